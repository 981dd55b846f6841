//! Byte-level encoding traits shared by the packet builders.

/// The destination slice did not have the exact size the value encodes into.
#[derive(Debug, PartialEq, Eq)]
pub struct EncodingError;

pub trait Encodable {
    /// Write the wire representation of `self` into `into`. The slice must
    /// be exactly as long as the encoded form.
    fn encode(&self, into: &mut [u8]) -> Result<(), EncodingError>;
}

/// Values that encode as a single wire byte.
pub trait OneByteEncodable {
    fn encoded_as_byte(&self) -> u8;
}

#[macro_export]
macro_rules! one_byte_encodable_enum {
    ( $( $enum:ty ),* ) => {
        $(
            impl Encodable for $enum where $enum: OneByteEncodable {
                fn encode(&self, into: &mut [u8]) -> Result<(), EncodingError> {
                    if into.len() != 1 { return Err(EncodingError); }
                    into[0] = self.encoded_as_byte();
                    Ok(())
                }
            }
        )*
    }
}

/// `None` encodes as "leave the destination bytes alone": absent fields keep
/// their zero fill and their control-flag bit stays clear.
impl<T> Encodable for Option<T>
where
    T: Encodable,
{
    fn encode(&self, into: &mut [u8]) -> Result<(), EncodingError> {
        match self {
            Some(encodable) => encodable.encode(into),
            None => Ok(()),
        }
    }
}
