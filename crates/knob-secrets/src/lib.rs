//! knob-secrets: group key and custodian key storage
//!
//! Group key discovery chain (in order of precedence):
//!   1. --group-key flag
//!   2. $KNOB_GROUP_KEY_FILE env var (path to key file)
//!   3. $KNOB_GROUP_KEY env var (literal base64 key)
//!   4. keys.group_key in knob.toml
//!   5. ~/.config/knob/group.key (default fallback)
//!
//! Custodian keys resolve flag, then $KNOB_CUSTODIAN_KEY / $KNOB_CUSTODIAN_PUB,
//! then knob.toml. There is no default location for them.

pub mod atomic;
pub mod custodian;
pub mod group_key;

pub use atomic::{atomic_write, FileMode};
pub use custodian::{
    generate_custodian, load_private_key, load_public_key, resolve_key_path, save_custodian,
    CustodianPaths,
};
pub use group_key::{
    create_group_key, find_group_key, load_group_key, save_group_key, GroupKeySource,
};
