use std::convert::TryFrom;

use crate::{
    bson::{Bson, Document, RawBsonRef},
    error::{Error, Result},
};

/// Coerces numeric BSON to i64. Servers report counts as int32, int64 or double depending on
/// version and magnitude.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn get_int(val: &Bson) -> Option<i64> {
    match *val {
        Bson::Int32(i) => Some(i64::from(i)),
        Bson::Int64(i) => Some(i),
        Bson::Double(f) if (f - (f as i64 as f64)).abs() <= f64::EPSILON => Some(f as i64),
        _ => None,
    }
}

pub(crate) fn get_int_raw(val: RawBsonRef<'_>) -> Option<i64> {
    match val {
        RawBsonRef::Int32(i) => Some(i64::from(i)),
        RawBsonRef::Int64(i) => Some(i),
        RawBsonRef::Double(f) => get_int(&Bson::Double(f)),
        RawBsonRef::Boolean(b) => Some(i64::from(b)),
        _ => None,
    }
}

pub(crate) fn get_u64(val: &Bson) -> Option<u64> {
    get_int(val).and_then(|i| u64::try_from(i).ok())
}

pub(crate) fn to_bson_array(docs: &[Document]) -> Bson {
    Bson::Array(docs.iter().map(|doc| Bson::Document(doc.clone())).collect())
}

#[cfg(test)]
pub(crate) fn sort_document(document: &mut Document) {
    let temp = std::mem::take(document);

    let mut elements: Vec<_> = temp.into_iter().collect();
    elements.sort_by(|e1, e2| e1.0.cmp(&e2.0));

    document.extend(elements);
}

pub(crate) fn first_key(document: &Document) -> Option<&str> {
    document.keys().next().map(String::as_str)
}

/// An update document may only contain update operators.
pub(crate) fn update_document_check(update: &Document) -> Result<()> {
    if update.is_empty() {
        return Err(Error::invalid_argument("update document must not be empty"));
    }
    if update.keys().all(|k| k.starts_with('$')) {
        Ok(())
    } else {
        Err(Error::invalid_argument(
            "update document must only contain keys starting with '$'",
        ))
    }
}

/// A replacement document may not contain any update operators.
pub(crate) fn replacement_document_check(replacement: &Document) -> Result<()> {
    if replacement.keys().any(|k| k.starts_with('$')) {
        Err(Error::invalid_argument(
            "replacement document must not contain keys starting with '$'",
        ))
    } else {
        Ok(())
    }
}

/// The encoded size of `doc`.
pub(crate) fn doc_size_bytes(doc: &Document) -> Result<usize> {
    let mut bytes = Vec::new();
    doc.to_writer(&mut bytes)?;
    Ok(bytes.len())
}

/// The number of bytes a document of `doc_len` bytes takes up as element `index` of an array.
pub(crate) fn array_entry_size_bytes(index: usize, doc_len: usize) -> usize {
    // type byte, the decimal key, the key's null terminator, the value
    1 + num_decimal_digits(index) + 1 + doc_len
}

fn num_decimal_digits(mut n: usize) -> usize {
    let mut digits = 0;

    loop {
        n /= 10;
        digits += 1;

        if n == 0 {
            return digits;
        }
    }
}
