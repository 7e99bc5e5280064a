use std::io::{Read, Seek, Write};

/// Custom stream-based serialization. Everything that lands on disk in an
/// archive goes through this trait; all multi-byte integers are
/// little-endian.
pub trait Streamable: Sized {
    type StreamError;
    /// Read the bytes
    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError>;
    /// Write the bytes
    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError>;
}

/// Macro for generating a serialization test for any type which conforms to
/// the Streamable trait
#[allow(unused_macros)]
macro_rules! streamable_tests {
    ($(
        <$type:ty, $error:ty>:
        $name:ident: $value:expr,
    )*) => {
    $(
        mod $name {
            #[allow(unused_imports)]
            use $crate::io::Streamable;
            #[allow(unused_imports)]
            use std::io::{Cursor, Seek, SeekFrom};

            #[test]
            fn to_from_bytes() -> Result<(), $error> {
                // Serialize
                let mut bytes = Cursor::new(<Vec<u8>>::new());
                $value.write_bytes(&mut bytes)?;
                // Rewind
                bytes.seek(SeekFrom::Start(0))?;
                // Reconstruct
                let new_value = <$type>::read_bytes(&mut bytes)?;
                // Reserialize
                let mut new_bytes = Cursor::new(<Vec<u8>>::new());
                new_value.write_bytes(&mut new_bytes)?;
                // Assert equality of byte arrays
                assert_eq!(bytes.into_inner(), new_bytes.into_inner());
                // Ok
                Ok(())
            }
        }
    )*
    }
}

// Doing this allows us to use the macro within the crate
#[allow(unused_imports)]
pub(crate) use streamable_tests;
