//! External reference tables.
//!
//! A snapshot can't contain native function addresses, they differ between
//! processes. V8 instead records the position of each callback in a table
//! supplied to the snapshot creator, and resolves positions against the table
//! supplied when the blob is restored. Both tables must have the same size;
//! the callbacks at each position may differ.

use std::borrow::Cow;
use v8::MapFnTo;

/// Position of a callback in an [`ExternalReferenceTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalIndex(pub usize);

#[derive(Clone)]
struct Entry {
    name: String,
    callback: v8::FunctionCallback,
}

/// Ordered native callbacks known to both the serializer and the deserializer.
///
/// # Example
///
/// ```rust,ignore
/// fn hello(scope: &mut v8::PinScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
///     rv.set(v8::String::new(scope, "hello").unwrap().into());
/// }
///
/// let mut refs = ExternalReferenceTable::new();
/// let hello_index = refs.register("hello", hello);
/// ```
#[derive(Clone, Default)]
pub struct ExternalReferenceTable {
    entries: Vec<Entry>,
}

impl ExternalReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback, returning its position.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        callback: impl MapFnTo<v8::FunctionCallback>,
    ) -> ExternalIndex {
        let index = ExternalIndex(self.entries.len());
        let name = name.into();

        log::debug!("Registered external reference {} at index {}", name, index.0);

        self.entries.push(Entry {
            name,
            callback: callback.map_fn_to(),
        });
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The raw callback at `index`, as templates are built from it.
    pub(crate) fn callback(&self, index: ExternalIndex) -> Option<v8::FunctionCallback> {
        self.entries.get(index.0).map(|entry| entry.callback)
    }

    pub fn name(&self, index: ExternalIndex) -> Option<&str> {
        self.entries.get(index.0).map(|entry| entry.name.as_str())
    }

    /// Names in table order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    /// Whether `other` can restore a blob built with this table.
    pub fn is_compatible_with(&self, other: &ExternalReferenceTable) -> bool {
        self.len() == other.len()
    }

    /// The table in the form `CreateParams` and the snapshot creator take.
    pub(crate) fn to_v8(&self) -> Cow<'static, [v8::ExternalReference]> {
        let references: Vec<v8::ExternalReference> = self
            .entries
            .iter()
            .map(|entry| v8::ExternalReference {
                function: entry.callback,
            })
            .collect();

        Cow::Owned(references)
    }
}

impl std::fmt::Debug for ExternalReferenceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
