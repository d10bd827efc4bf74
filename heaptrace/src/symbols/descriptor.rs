//! JVM type descriptor conversion.
//!
//! Traces carry internal names (`Ljava/lang/String;`, `[I`) and method
//! signatures (`java/util/HashMap.put(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;`).
//! The helpers here turn them into the readable forms used for labels and keys.

/// Descriptor character for types whose signature the producer did not know.
pub const UNKNOWN_DESCRIPTOR: char = 'U';

/// Convert a run of type descriptors into readable type names.
///
/// Returns `None` if the descriptor is malformed (unterminated class name,
/// unknown primitive character).
///
/// ```ignore
/// assert_eq!(java_types("I[Ljava/lang/String;", false).unwrap(), ["int", "java.lang.String[]"]);
/// ```
#[must_use]
pub fn java_types(descriptors: &str, omit_package: bool) -> Option<Vec<String>> {
    let bytes = descriptors.as_bytes();
    let mut types = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let mut rank = 0;
        while pos < bytes.len() && bytes[pos] == b'[' {
            rank += 1;
            pos += 1;
        }
        let tag = *bytes.get(pos)?;

        let mut name = if tag == b'L' {
            let end = pos + descriptors[pos..].find(';')?;
            let class = descriptors[pos + 1..end].replace('/', ".");
            pos = end + 1;
            if omit_package {
                class.rsplit('.').next().unwrap_or(&class).to_string()
            } else {
                class
            }
        } else {
            pos += 1;
            primitive_name(tag as char)?.to_string()
        };

        for _ in 0..rank {
            name.push_str("[]");
        }
        types.push(name);
    }

    Some(types)
}

/// Convert one internal type name into its external form.
///
/// Plain class names without descriptor syntax (`com.acme.Order`) are
/// returned unchanged so hand-written symbol files stay readable.
#[must_use]
pub fn external_name(internal: &str) -> String {
    let looks_like_descriptor = internal.starts_with('[')
        || (internal.starts_with('L') && internal.ends_with(';'))
        || (internal.len() == 1 && primitive_name(internal.chars().next().unwrap_or(' ')).is_some());

    if looks_like_descriptor {
        if let Some(mut types) = java_types(internal, false) {
            if types.len() == 1 {
                return types.remove(0);
            }
        }
    }
    internal.replace('/', ".")
}

/// Returns true if `internal` is an array whose element type is primitive.
#[must_use]
pub fn is_primitive_array(internal: &str) -> bool {
    let element = internal.trim_start_matches('[');
    internal.starts_with('[') && element.len() == 1 && element != "U"
}

fn primitive_name(tag: char) -> Option<&'static str> {
    Some(match tag {
        'V' => "void",
        'Z' => "boolean",
        'B' => "byte",
        'C' => "char",
        'S' => "short",
        'I' => "int",
        'J' => "long",
        'F' => "float",
        'D' => "double",
        UNKNOWN_DESCRIPTOR => "unknown",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_java_types_mixed_descriptors() {
        let types = java_types("I[Ljava/lang/String;[[J", false).unwrap();
        assert_eq!(types, vec!["int", "java.lang.String[]", "long[][]"]);
    }

    #[test]
    fn test_java_types_omit_package() {
        let types = java_types("Ljava/util/Map;Z", true).unwrap();
        assert_eq!(types, vec!["Map", "boolean"]);
    }

    #[test]
    fn test_malformed_descriptor() {
        assert!(java_types("Ljava/lang/String", false).is_none());
        assert!(java_types("Q", false).is_none());
    }

    #[test]
    fn test_external_name() {
        assert_eq!(external_name("Ljava/lang/Object;"), "java.lang.Object");
        assert_eq!(external_name("[B"), "byte[]");
        assert_eq!(external_name("com.acme.Order"), "com.acme.Order");
        assert_eq!(external_name("com/acme/Order"), "com.acme.Order");
    }

    #[test]
    fn test_primitive_array_detection() {
        assert!(is_primitive_array("[I"));
        assert!(is_primitive_array("[[C"));
        assert!(!is_primitive_array("[Ljava/lang/String;"));
        assert!(!is_primitive_array("I"));
    }
}
