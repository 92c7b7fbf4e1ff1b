//! Symmetric key types: file key, group key, session key

use rand::RngCore;
use zeroize::Zeroize;

use crate::KEY_SIZE;

macro_rules! symmetric_key {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name {
            bytes: [u8; KEY_SIZE],
        }

        impl $name {
            pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self { bytes }
            }

            /// Build a key from a slice, returning `None` unless it is exactly
            /// `KEY_SIZE` bytes long.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                let bytes: [u8; KEY_SIZE] = bytes.try_into().ok()?;
                Some(Self { bytes })
            }

            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.bytes
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.bytes.zeroize();
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bytes", &"[REDACTED]")
                    .finish()
            }
        }
    };
}

symmetric_key!(
    /// A per-file 256-bit encryption key. Never persisted: the only durable
    /// trace is the AONT binding. Zeroized on drop.
    FileKey
);

symmetric_key!(
    /// The 256-bit key shared by the current group, used only for the
    /// super-block layer. Zeroized on drop.
    GroupKey
);

symmetric_key!(
    /// An ephemeral 256-bit key protecting one file's super-block index.
    /// Zeroized on drop.
    SessionKey
);

fn random_key_bytes() -> [u8; KEY_SIZE] {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Generate a random 256-bit file encryption key.
pub fn generate_file_key() -> FileKey {
    FileKey::from_bytes(random_key_bytes())
}

/// Generate a random 256-bit group key.
pub fn generate_group_key() -> GroupKey {
    GroupKey::from_bytes(random_key_bytes())
}

/// Generate a random 256-bit session key.
pub fn generate_session_key() -> SessionKey {
    SessionKey::from_bytes(random_key_bytes())
}
