/// Encryption error kinds
pub mod error;

pub use error::CryptoError;

use crate::{
    constants::TACHYON_MAGIC,
    container::{ContainerHeader, DataContainer, Encryption, StreamHeader},
    io::{fnv1a64, read_bytes_exact, read_leu64, read_leu8, Streamable},
};
use aead::{
    generic_array::{typenum::U16, GenericArray},
    Aead, KeyInit,
};
use aes_gcm::{aes::Aes256, AesGcm};
use rand::{rngs::OsRng, RngCore};
use std::{
    collections::HashMap,
    io::{Cursor, Read, Seek, Write},
    sync::Mutex,
};

/// AES-256-GCM with the format's 128-bit IV
type Cipher = AesGcm<Aes256, U16>;

/// One keychain entry: the ephemeral key material of a single encrypted
/// container, addressed by a random 64-bit identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeychainKey {
    pub encryption: Encryption,
    pub id: u64,
    pub key: [u8; 32],
    pub iv: [u8; 16],
    pub tag: [u8; 16],
}

impl KeychainKey {
    /// Generate fresh random key material; the identifier is assigned by
    /// the keychain on insert
    pub fn random() -> Self {
        let mut key = [0u8; 32];
        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self {
            encryption: Encryption::AesGcm256,
            id: 0,
            key,
            iv,
            tag: [0; 16],
        }
    }
}

#[derive(Debug, Default)]
struct KeychainInner {
    entries: Vec<KeychainKey>,
    /// Identifier -> ordinal position
    table: HashMap<u64, usize>,
}

/// Process-wide store of container keys. The archive is portable without
/// the keychain and unreadable without it. Insert and identifier lookup are
/// the only guarded operations.
#[derive(Debug, Default)]
pub struct Keychain {
    inner: Mutex<KeychainInner>,
}

impl Keychain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("keychain lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Draw a fresh identifier from cryptographically-random bytes,
    /// retrying on collision with existing entries
    pub fn generate_identifier(&self) -> u64 {
        let inner = self.inner.lock().expect("keychain lock poisoned");
        loop {
            let mut random = [0u8; 32];
            OsRng.fill_bytes(&mut random);
            let value = fnv1a64(&random);
            if value != 0 && !inner.table.contains_key(&value) {
                return value;
            }
        }
    }

    /// Append an entry under its identifier
    pub fn insert(&self, key: KeychainKey) {
        let mut inner = self.inner.lock().expect("keychain lock poisoned");
        let position = inner.entries.len();
        inner.table.insert(key.id, position);
        inner.entries.push(key);
    }

    /// Copy out the entry with the given identifier
    pub fn get(&self, id: u64) -> Option<KeychainKey> {
        let inner = self.inner.lock().expect("keychain lock poisoned");
        inner.table.get(&id).map(|position| inner.entries[*position])
    }

    /// Remove and return the entry with the given identifier
    pub fn remove(&self, id: u64) -> Option<KeychainKey> {
        let mut inner = self.inner.lock().expect("keychain lock poisoned");
        let position = inner.table.remove(&id)?;
        let entry = inner.entries.remove(position);
        // Removal shifts the ordinals behind it
        inner.table.clear();
        let pairs: Vec<(u64, usize)> = inner
            .entries
            .iter()
            .enumerate()
            .map(|(ordinal, key)| (key.id, ordinal))
            .collect();
        inner.table.extend(pairs);
        Some(entry)
    }

    /// Merge all entries of another keychain into this one
    pub fn extend(&self, other: &Keychain) {
        let entries: Vec<KeychainKey> = {
            let inner = other.inner.lock().expect("keychain lock poisoned");
            inner.entries.clone()
        };
        for entry in entries {
            self.insert(entry);
        }
    }
}

impl Streamable for Keychain {
    type StreamError = CryptoError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        let inner = self.inner.lock().expect("keychain lock poisoned");
        w.write_all(&TACHYON_MAGIC)?;
        w.write_all(&(inner.entries.len() as u64).to_le_bytes())?;
        // Capacity is advisory; retained for layout stability
        w.write_all(&(inner.entries.capacity() as u64).to_le_bytes())?;
        for entry in &inner.entries {
            w.write_all(&[u8::from(entry.encryption)])?;
            w.write_all(&entry.id.to_le_bytes())?;
            w.write_all(&entry.key)?;
            w.write_all(&entry.iv)?;
            if entry.encryption == Encryption::AesGcm256 {
                w.write_all(&entry.tag)?;
            }
        }
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        let magic = read_bytes_exact(r, TACHYON_MAGIC.len())?;
        if magic != TACHYON_MAGIC {
            return Err(CryptoError::BadMagic);
        }
        let n_entries = read_leu64(r)?;
        let _capacity = read_leu64(r)?;

        let keychain = Keychain::new();
        for _ in 0..n_entries {
            let type_tag = read_leu8(r)?;
            let encryption = Encryption::try_from(type_tag)
                .map_err(|_| CryptoError::UnknownKeyType(type_tag))?;
            let id = read_leu64(r)?;
            let mut key = [0u8; 32];
            r.read_exact(&mut key)?;
            let mut iv = [0u8; 16];
            r.read_exact(&mut iv)?;
            let mut tag = [0u8; 16];
            if encryption == Encryption::AesGcm256 {
                r.read_exact(&mut tag)?;
            }
            keychain.insert(KeychainKey {
                encryption,
                id,
                key,
                iv,
                tag,
            });
        }
        Ok(keychain)
    }
}

/// Encrypt a compressed container in place. The plaintext is the serialized
/// container header followed by the compressed data and stride buffers; the
/// ciphertext becomes the container's sole payload and the stored header is
/// reduced to a placeholder that names the keychain entry.
pub fn encrypt_container(
    container: &mut DataContainer,
    keychain: &Keychain,
) -> Result<(), CryptoError> {
    let mut entry = KeychainKey::random();

    // Assemble the plaintext: header, data, strides
    let mut plaintext = Cursor::new(<Vec<u8>>::new());
    container.header.write_bytes(&mut plaintext)?;
    plaintext.get_mut().extend_from_slice(&container.data);
    plaintext.get_mut().extend_from_slice(&container.strides);
    let plaintext = plaintext.into_inner();

    let cipher = Cipher::new(GenericArray::from_slice(&entry.key));
    let mut ciphertext = cipher
        .encrypt(GenericArray::from_slice(&entry.iv), plaintext.as_ref())
        .map_err(|_| CryptoError::Auth)?;
    // The trailing 16 bytes are the GCM tag; it travels in the keychain
    let tag_offset = ciphertext.len() - 16;
    entry.tag.copy_from_slice(&ciphertext[tag_offset..]);
    ciphertext.truncate(tag_offset);

    let id = keychain.generate_identifier();
    entry.id = id;

    // Replace the stored header with the encrypted-mode placeholder
    let e_length = ciphertext.len() as u32;
    container.header = ContainerHeader {
        identifier: id,
        ..ContainerHeader::default()
    };
    container.header.data.controller.encryption = Encryption::AesGcm256;
    container.header.data.e_length = e_length;
    container.data = ciphertext;
    container.strides.clear();
    container.data_uncompressed.clear();
    container.strides_uncompressed.clear();

    keychain.insert(entry);
    Ok(())
}

/// Decrypt a container in place: locate the keychain entry, verify the GCM
/// tag, recover the embedded header and split the data and stride buffers
/// by the lengths it records.
pub fn decrypt_container(
    container: &mut DataContainer,
    keychain: &Keychain,
) -> Result<(), CryptoError> {
    if container.header.data.controller.encryption == Encryption::None {
        return Ok(());
    }
    let id = container.header.identifier;
    let entry = keychain.get(id).ok_or(CryptoError::MissingKey(id))?;

    // Rebuild ciphertext || tag for the AEAD
    let mut ciphertext = container.data.clone();
    ciphertext.extend_from_slice(&entry.tag);
    let cipher = Cipher::new(GenericArray::from_slice(&entry.key));
    let plaintext = cipher
        .decrypt(GenericArray::from_slice(&entry.iv), ciphertext.as_ref())
        .map_err(|_| CryptoError::Auth)?;

    // Recover the embedded header, then the data and stride sub-buffers
    let mut cursor = Cursor::new(plaintext);
    let header = ContainerHeader::read_bytes(&mut cursor)?;
    let data = read_bytes_exact(&mut cursor, header.data.c_length as usize)?;
    let strides = if stride_bytes(&header.stride) > 0 {
        read_bytes_exact(&mut cursor, header.stride.c_length as usize)?
    } else {
        Vec::new()
    };

    container.header = header;
    container.data = data;
    container.strides = strides;
    Ok(())
}

fn stride_bytes(header: &StreamHeader) -> u32 {
    header.c_length
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compression::{compress_container, decompress_container};
    use std::io::{Cursor, SeekFrom};

    fn sealed_container() -> DataContainer {
        let mut container = DataContainer::new();
        for i in 0..1000i32 {
            container.add_f32(i as f32 * 0.25).expect("float add");
            container.increment();
        }
        container.update_container(false, false).expect("seal");
        compress_container(&mut container).expect("compress");
        container
    }

    #[test]
    fn encrypt_decrypt_round_trip() -> Result<(), CryptoError> {
        let keychain = Keychain::new();
        let mut container = sealed_container();
        let reference = container.clone();

        encrypt_container(&mut container, &keychain)?;
        assert!(container.is_encrypted());
        assert_eq!(keychain.len(), 1);
        assert_ne!(container.data, reference.data);

        decrypt_container(&mut container, &keychain)?;
        assert_eq!(container.header, reference.header);
        assert_eq!(container.data, reference.data);

        decompress_container(&mut container).expect("decompress");
        assert_eq!(container.data_uncompressed, reference.data_uncompressed);
        Ok(())
    }

    #[test]
    fn missing_key_is_an_auth_failure() -> Result<(), CryptoError> {
        let keychain = Keychain::new();
        let mut container = sealed_container();
        encrypt_container(&mut container, &keychain)?;

        let id = container.header.identifier;
        keychain.remove(id).expect("entry exists");
        let err = decrypt_container(&mut container, &keychain).unwrap_err();
        assert!(matches!(err, CryptoError::MissingKey(found) if found == id));
        Ok(())
    }

    #[test]
    fn tampered_ciphertext_fails_tag_check() -> Result<(), CryptoError> {
        let keychain = Keychain::new();
        let mut container = sealed_container();
        encrypt_container(&mut container, &keychain)?;

        container.data[0] ^= 0x01;
        let err = decrypt_container(&mut container, &keychain).unwrap_err();
        assert!(matches!(err, CryptoError::Auth));
        Ok(())
    }

    #[test]
    fn keychain_file_round_trip() -> Result<(), CryptoError> {
        let keychain = Keychain::new();
        for _ in 0..3 {
            let mut entry = KeychainKey::random();
            entry.id = keychain.generate_identifier();
            keychain.insert(entry);
        }

        let mut bytes = Cursor::new(<Vec<u8>>::new());
        keychain.write_bytes(&mut bytes)?;
        bytes.seek(SeekFrom::Start(0))?;
        let restored = Keychain::read_bytes(&mut bytes)?;
        assert_eq!(restored.len(), keychain.len());
        Ok(())
    }

    #[test]
    fn identifiers_do_not_collide() {
        let keychain = Keychain::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let mut entry = KeychainKey::random();
            entry.id = keychain.generate_identifier();
            keychain.insert(entry);
            assert!(seen.insert(entry.id));
        }
    }
}
