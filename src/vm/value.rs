//! Tagged runtime values.
//!
//! A register cell is either an unboxed 64-bit bit pattern with a type
//! tag, or an owning handle to a boxed heap object. Boxed values die with
//! the register that holds them: overwriting or deleting the register
//! drops the box.

/// A boxed heap object owned by a register.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoxedObject {
    /// An owned string built by the STRING instruction.
    Str(String),
    /// An interned atom name resolved by the ATOM instruction.
    Atom(String),
}

impl BoxedObject {
    pub fn type_name(&self) -> &'static str {
        match self {
            BoxedObject::Str(_) => "string",
            BoxedObject::Atom(_) => "atom",
        }
    }
}

/// A register cell.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// The empty cell; reads as zero where a number is needed.
    #[default]
    Void,
    Byte(u8),
    Signed(i64),
    Unsigned(u64),
    FloatSingle(f32),
    FloatDouble(f64),
    Boxed(BoxedObject),
}

impl Value {
    /// True iff the cell holds nothing.
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// True for boxed values.
    pub fn is_boxed(&self) -> bool {
        matches!(self, Value::Boxed(_))
    }

    /// The tag name, for traps and EBREAK dumps.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Byte(_) => "byte",
            Value::Signed(_) => "signed integer",
            Value::Unsigned(_) => "unsigned integer",
            Value::FloatSingle(_) => "single-precision float",
            Value::FloatDouble(_) => "double-precision float",
            Value::Boxed(boxed) => boxed.type_name(),
        }
    }

    /// The raw 64-bit bit pattern of an unboxed value.
    ///
    /// Void reads as zero; boxed values have no bit pattern.
    pub fn bits(&self) -> Option<u64> {
        match self {
            Value::Void => Some(0),
            Value::Byte(b) => Some(*b as u64),
            Value::Signed(v) => Some(*v as u64),
            Value::Unsigned(v) => Some(*v),
            Value::FloatSingle(v) => Some(v.to_bits() as u64),
            Value::FloatDouble(v) => Some(v.to_bits()),
            Value::Boxed(_) => None,
        }
    }

    /// True when the unboxed tag is a signed integer.
    pub fn is_signed(&self) -> bool {
        matches!(self, Value::Signed(_))
    }

    /// Rebuilds a value of the same tag from a bit pattern.
    pub fn with_bits(&self, bits: u64) -> Value {
        match self {
            Value::Void => Value::Void,
            Value::Byte(_) => Value::Byte(bits as u8),
            Value::Signed(_) => Value::Signed(bits as i64),
            Value::Unsigned(_) => Value::Unsigned(bits),
            Value::FloatSingle(_) => Value::FloatSingle(f32::from_bits(bits as u32)),
            Value::FloatDouble(_) => Value::FloatDouble(f64::from_bits(bits)),
            Value::Boxed(_) => Value::Void,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_is_default_and_reads_zero() {
        let value = Value::default();
        assert!(value.is_void());
        assert_eq!(value.bits(), Some(0));
    }

    #[test]
    fn bits_roundtrip_through_tags() {
        assert_eq!(Value::Signed(-1).bits(), Some(u64::MAX));
        assert_eq!(Value::Unsigned(42).bits(), Some(42));
        assert_eq!(Value::Byte(0xff).bits(), Some(0xff));
        assert_eq!(
            Value::FloatSingle(3.14).bits(),
            Some(3.14f32.to_bits() as u64)
        );
    }

    #[test]
    fn boxed_has_no_bits() {
        assert_eq!(Value::Boxed(BoxedObject::Str("hi".into())).bits(), None);
    }

    #[test]
    fn with_bits_keeps_tag() {
        let signed = Value::Signed(0).with_bits(u64::MAX);
        assert_eq!(signed, Value::Signed(-1));

        let unsigned = Value::Unsigned(0).with_bits(7);
        assert_eq!(unsigned, Value::Unsigned(7));
    }

    #[test]
    fn type_names_for_dumps() {
        assert_eq!(Value::Void.type_name(), "void");
        assert_eq!(
            Value::Boxed(BoxedObject::Atom("a".into())).type_name(),
            "atom"
        );
    }
}
