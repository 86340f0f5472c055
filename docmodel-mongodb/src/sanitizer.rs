//! Key sanitization for MongoDB compatibility.
//!
//! MongoDB reserves `.` and `$` in field names for paths and operators, and
//! terminates names at NUL. Stored documents may legitimately carry such keys
//! (a map field keyed by file names, say), so they are escaped on the way in
//! and restored on the way out. Values are never touched.

use bson::{Bson, Document};

use docmodel_core::id::ID_KEY;

pub(crate) struct KeySanitizer;

impl KeySanitizer {
    const REPLACEMENTS: [(&'static str, &'static str); 3] = [
        (".", "__dot__"),
        ("$", "__dollar__"),
        ("\0", "__null__"),
    ];

    /// Escapes every key of a document to be stored, recursively. The
    /// identifier key is left alone.
    pub(crate) fn sanitize_document(document: Document) -> Document {
        document
            .into_iter()
            .map(|(key, value)| {
                let key = if key == ID_KEY { key } else { Self::sanitize_key(&key) };
                (key, Self::sanitize_value(value))
            })
            .collect()
    }

    /// Reverses [`sanitize_document`](Self::sanitize_document).
    pub(crate) fn restore_document(document: Document) -> Document {
        document
            .into_iter()
            .map(|(key, value)| (Self::restore_key(&key), Self::restore_value(value)))
            .collect()
    }

    fn sanitize_value(value: Bson) -> Bson {
        match value {
            Bson::Document(doc) => Bson::Document(
                doc.into_iter()
                    .map(|(k, v)| (Self::sanitize_key(&k), Self::sanitize_value(v)))
                    .collect(),
            ),
            Bson::Array(items) => Bson::Array(items.into_iter().map(Self::sanitize_value).collect()),
            other => other,
        }
    }

    fn restore_value(value: Bson) -> Bson {
        match value {
            Bson::Document(doc) => Bson::Document(Self::restore_document(doc)),
            Bson::Array(items) => Bson::Array(items.into_iter().map(Self::restore_value).collect()),
            other => other,
        }
    }

    fn sanitize_key(input: &str) -> String {
        let mut sanitized = input.to_string();
        for (target, replacement) in Self::REPLACEMENTS.iter() {
            sanitized = sanitized.replace(*target, *replacement);
        }
        sanitized
    }

    fn restore_key(input: &str) -> String {
        let mut restored = input.to_string();
        for (target, replacement) in Self::REPLACEMENTS.iter().rev() {
            restored = restored.replace(*replacement, *target);
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn escapes_keys_but_not_values() {
        let document = doc! {
            "_id": 1,
            "files": { "notes.txt": "a.b", "$price": 3 },
            "history": [{ "v1.0": "$x" }],
        };
        let sanitized = KeySanitizer::sanitize_document(document.clone());

        assert_eq!(
            sanitized,
            doc! {
                "_id": 1,
                "files": { "notes__dot__txt": "a.b", "__dollar__price": 3 },
                "history": [{ "v1__dot__0": "$x" }],
            }
        );
        assert_eq!(KeySanitizer::restore_document(sanitized), document);
    }
}
