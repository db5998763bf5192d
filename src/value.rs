use crate::error::SnapshotError;

/// An auxiliary datum stored in a blob next to (or independent of) a context.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotValue {
    Number(f64),
    Boolean(bool),
    String(String),
}

impl SnapshotValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn to_v8<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
    ) -> Result<v8::Local<'s, v8::Value>, SnapshotError> {
        let value: v8::Local<v8::Value> = match self {
            Self::Number(n) => v8::Number::new(scope, *n).into(),
            Self::Boolean(b) => v8::Boolean::new(scope, *b).into(),
            Self::String(s) => v8::String::new(scope, s)
                .ok_or(SnapshotError::StringAllocation)?
                .into(),
        };

        Ok(value)
    }

    pub(crate) fn from_v8(
        scope: &mut v8::PinScope,
        value: v8::Local<v8::Value>,
    ) -> Result<Self, SnapshotError> {
        if value.is_number() {
            let number: v8::Local<v8::Number> = value
                .try_into()
                .map_err(|_| SnapshotError::UnsupportedValue("number".to_string()))?;
            return Ok(Self::Number(number.value()));
        }

        if value.is_boolean() {
            return Ok(Self::Boolean(value.is_true()));
        }

        if value.is_string() {
            return Ok(Self::String(value.to_rust_string_lossy(scope)));
        }

        Err(SnapshotError::UnsupportedValue(
            value.type_of(scope).to_rust_string_lossy(scope),
        ))
    }
}

impl From<f64> for SnapshotValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for SnapshotValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<&str> for SnapshotValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for SnapshotValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(SnapshotValue::from(18.0).as_number(), Some(18.0));
        assert_eq!(SnapshotValue::from("abc").as_str(), Some("abc"));
        assert_eq!(SnapshotValue::from(true).as_number(), None);
        assert_eq!(SnapshotValue::from(1.5).as_str(), None);
    }
}
