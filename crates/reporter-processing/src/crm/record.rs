//! Decrypts encrypted CRM fields on result rows.

use reporter_repository::Row;
use serde_json::Value;

use super::cipher::{Crypto, CryptoError};
use super::fields::ENCRYPTED_FIELDS;

/// Decrypts every row, stopping at the first row that fails.
pub fn decrypt_records(crypto: &Crypto, rows: &[Row]) -> Result<Vec<Row>, CryptoError> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            decrypt_record(crypto, row).map_err(|source| CryptoError::Record {
                index,
                source: Box::new(source),
            })
        })
        .collect()
}

/// Returns a copy of `row` with every known encrypted field decrypted.
pub fn decrypt_record(crypto: &Crypto, row: &Row) -> Result<Row, CryptoError> {
    let mut decrypted = row.clone();
    for field in ENCRYPTED_FIELDS {
        let segments: Vec<&str> = field.segments().collect();
        let Some((head, rest)) = segments.split_first() else {
            continue;
        };
        if let Some(value) = decrypted.get_mut(*head) {
            decrypt_path(crypto, value, rest, head)?;
        }
    }
    Ok(decrypted)
}

fn decrypt_path(
    crypto: &Crypto,
    value: &mut Value,
    segments: &[&str],
    trail: &str,
) -> Result<(), CryptoError> {
    let Some((head, rest)) = segments.split_first() else {
        return decrypt_value(crypto, value, trail);
    };

    match value {
        Value::Object(map) => match map.get_mut(*head) {
            Some(child) => decrypt_path(crypto, child, rest, &format!("{trail}.{head}")),
            None => Ok(()),
        },
        Value::Array(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                if item.is_object() {
                    decrypt_path(crypto, item, segments, &format!("{trail}[{index}]"))?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn decrypt_value(crypto: &Crypto, value: &mut Value, path: &str) -> Result<(), CryptoError> {
    if let Value::String(text) = value {
        if !text.is_empty() {
            let plaintext = crypto.decrypt(text).map_err(|err| CryptoError::Decrypt {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
            *text = plaintext;
        }
    }
    Ok(())
}
