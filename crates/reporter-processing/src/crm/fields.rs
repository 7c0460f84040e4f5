//! The encrypted CRM fields, consulted both when hashing filters and when
//! decrypting result rows.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptedField {
    /// Logical dotted path; an array segment applies to each element.
    pub path: &'static str,
    /// Hashed companion used for equality search, when one exists.
    pub search_field: Option<&'static str>,
}

impl EncryptedField {
    const fn searchable(path: &'static str, search_field: &'static str) -> Self {
        Self {
            path,
            search_field: Some(search_field),
        }
    }

    const fn decrypt_only(path: &'static str) -> Self {
        Self {
            path,
            search_field: None,
        }
    }

    pub fn is_top_level(&self) -> bool {
        !self.path.contains('.')
    }

    pub fn segments(&self) -> impl Iterator<Item = &'static str> {
        self.path.split('.')
    }
}

pub const ENCRYPTED_FIELDS: &[EncryptedField] = &[
    EncryptedField::searchable("document", "search.document"),
    EncryptedField::searchable("name", "search.name"),
    EncryptedField::searchable("banking_details.account", "search.banking_details_account"),
    EncryptedField::searchable("banking_details.iban", "search.banking_details_iban"),
    EncryptedField::searchable("contact.primary_email", "search.contact_primary_email"),
    EncryptedField::searchable("contact.secondary_email", "search.contact_secondary_email"),
    EncryptedField::searchable("contact.mobile_phone", "search.contact_mobile_phone"),
    EncryptedField::searchable("contact.other_phone", "search.contact_other_phone"),
    EncryptedField::searchable(
        "regulatory_fields.participant_document",
        "search.regulatory_fields_participant_document",
    ),
    EncryptedField::searchable("related_parties.document", "search.related_party_documents"),
    EncryptedField::decrypt_only("legal_person.representative.name"),
    EncryptedField::decrypt_only("legal_person.representative.document"),
    EncryptedField::decrypt_only("legal_person.representative.email"),
    EncryptedField::decrypt_only("natural_person.mother_name"),
    EncryptedField::decrypt_only("natural_person.father_name"),
];

/// Search field for a logical filter field, if it is encrypted.
pub fn search_field_for(field: &str) -> Option<&'static str> {
    ENCRYPTED_FIELDS
        .iter()
        .find(|entry| entry.path == field)
        .and_then(|entry| entry.search_field)
}

/// True when `field` is a top-level encrypted name such as `document`.
pub fn is_top_level_encrypted(field: &str) -> bool {
    ENCRYPTED_FIELDS
        .iter()
        .any(|entry| entry.is_top_level() && entry.path == field)
}

/// Rows are only decrypted when the request asks for a top-level encrypted
/// field or any nested path.
pub fn requires_decryption(fields: &[String]) -> bool {
    fields
        .iter()
        .any(|field| is_top_level_encrypted(field) || field.contains('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_covers_every_searchable_field() {
        let searchable: Vec<_> = ENCRYPTED_FIELDS
            .iter()
            .filter_map(|entry| entry.search_field.map(|search| (entry.path, search)))
            .collect();
        assert_eq!(searchable.len(), 10);
        assert_eq!(search_field_for("document"), Some("search.document"));
        assert_eq!(
            search_field_for("related_parties.document"),
            Some("search.related_party_documents")
        );
        assert_eq!(search_field_for("legal_person.representative.name"), None);
        assert_eq!(search_field_for("status"), None);
    }

    #[test]
    fn decryption_trigger() {
        assert!(requires_decryption(&["name".into()]));
        assert!(requires_decryption(&["status".into(), "contact.primary_email".into()]));
        assert!(requires_decryption(&["metadata.anything".into()]));
        assert!(!requires_decryption(&["status".into(), "created_at".into()]));
        assert!(!requires_decryption(&[]));
    }
}
