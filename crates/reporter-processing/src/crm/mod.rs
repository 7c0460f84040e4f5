//! CRM datasource support: hashed search filters and field decryption.

mod cipher;
mod fields;
mod filter;
mod record;

pub use cipher::{CrmSecrets, Crypto, CryptoError, ENCRYPT_KEY_ENV, HASH_KEY_ENV};
pub use fields::{
    is_top_level_encrypted, requires_decryption, search_field_for, EncryptedField,
    ENCRYPTED_FIELDS,
};
pub use filter::{has_searchable_fields, transform_filters};
pub use record::{decrypt_record, decrypt_records};

/// Logical name of the CRM datasource.
pub const CRM_DATASOURCE: &str = "plugin_crm";

/// CRM collection that only carries context and is never queried.
pub const ORGANIZATION_COLLECTION: &str = "organization";

/// Physical CRM collections are `<logical>_<organization id>`.
pub fn physical_collection(collection: &str, organization_id: &str) -> String {
    format!("{collection}_{organization_id}")
}

/// Whether filters for `collection` must be hashed before querying.
pub fn is_encrypted_collection(collection: &str) -> bool {
    collection.contains('_') && !collection.contains(ORGANIZATION_COLLECTION)
}
