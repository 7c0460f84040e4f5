//! Rewrites CRM filters onto their hashed `search.*` companions.

use reporter_repository::{FieldFilters, FilterCondition, Predicate};
use serde_json::Value;

use super::cipher::Crypto;
use super::fields::search_field_for;

/// Moves every encrypted field's condition to its search field and hashes
/// its non-empty string values. Other fields pass through untouched.
pub fn transform_filters(crypto: &Crypto, filters: Option<&FieldFilters>) -> Option<FieldFilters> {
    let filters = filters?;
    let transformed = filters
        .iter()
        .map(|(field, condition)| match search_field_for(field) {
            Some(search_field) => (search_field.to_string(), hash_condition(crypto, condition)),
            None => (field.clone(), condition.clone()),
        })
        .collect();
    Some(transformed)
}

/// True when the filters name at least one encrypted field, i.e. when hashing
/// needs the crypto keys at all.
pub fn has_searchable_fields(filters: &FieldFilters) -> bool {
    filters.keys().any(|field| search_field_for(field).is_some())
}

fn hash_condition(crypto: &Crypto, condition: &FilterCondition) -> FilterCondition {
    let mut hashed = condition.clone();
    for predicate in Predicate::ALL {
        if let Some(values) = hashed.values_mut(predicate) {
            hash_filter_values(crypto, values);
        }
    }
    hashed
}

fn hash_filter_values(crypto: &Crypto, values: &mut [Value]) {
    for value in values.iter_mut() {
        if let Value::String(text) = value {
            if !text.is_empty() {
                let hashed = crypto.hash(text);
                *text = hashed;
            }
        }
    }
}
