//! Built-in classifiers.

use crate::domain::ClassificationError;
use crate::registry::classifier::{Classification, Classifier, ClassifierKind, Key};
use crate::registry::unit::{invalid_property, parse_bool, Capability, Property, PropertyKind, Unit};
use crate::stream::{ObjectContext, SourceCollection};
use crate::symbols::Location;
use std::collections::BTreeSet;

type ClassifyFn = fn(&ObjectContext<'_>) -> Result<Classification, ClassificationError>;

/// Stateless classifier backed by a plain function.
#[derive(Clone, Copy)]
pub struct FnClassifier {
    pub name: &'static str,
    pub description: &'static str,
    pub example: &'static str,
    pub kind: ClassifierKind,
    pub source: SourceCollection,
    pub capabilities: &'static [Capability],
    pub classify: ClassifyFn,
}

impl Unit for FnClassifier {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn example(&self) -> &str {
        self.example
    }

    fn source_collection(&self) -> SourceCollection {
        self.source
    }

    fn capabilities(&self) -> &[Capability] {
        self.capabilities
    }
}

impl Classifier for FnClassifier {
    fn kind(&self) -> ClassifierKind {
        self.kind
    }

    fn classify(&mut self, object: &ObjectContext<'_>) -> Result<Classification, ClassificationError> {
        (self.classify)(object)
    }
}

fn one(key: impl Into<Key>) -> Result<Classification, ClassificationError> {
    Ok(Classification::One(key.into()))
}

pub const ALLOCATION_SITE: FnClassifier = FnClassifier {
    name: "Allocation Site",
    description: "Top frame of the allocating call stack",
    example: "Shop::buy():3",
    kind: ClassifierKind::One,
    source: SourceCollection::All,
    capabilities: &[Capability::AllocationSite],
    classify: |object| one(object.site().label()),
};

pub const SPACE: FnClassifier = FnClassifier {
    name: "Space",
    description: "Heap space holding the object",
    example: "Space#3",
    kind: ClassifierKind::One,
    source: SourceCollection::All,
    capabilities: &[Capability::Space],
    classify: |object| match object.space {
        Some(space) => one(space.id.to_string()),
        None => one("Unknown space"),
    },
};

pub const SPACE_KIND: FnClassifier = FnClassifier {
    name: "Space Kind",
    description: "Generation of the space holding the object",
    example: "Eden",
    kind: ClassifierKind::One,
    source: SourceCollection::All,
    capabilities: &[Capability::Space],
    classify: |object| one(object.space.and_then(|s| s.kind).map_or("Unknown", |k| k.label())),
};

pub const ALLOCATING_THREAD: FnClassifier = FnClassifier {
    name: "Allocating Thread",
    description: "Thread that allocated the object",
    example: "main",
    kind: ClassifierKind::One,
    source: SourceCollection::All,
    capabilities: &[Capability::Thread],
    classify: |object| match object.thread_name {
        Some(name) => one(name),
        None => one(object.info.thread.to_string()),
    },
};

pub const ALLOCATOR: FnClassifier = FnClassifier {
    name: "Allocator",
    description: "Interpreter, compiled code or VM",
    example: "C2",
    kind: ClassifierKind::One,
    source: SourceCollection::All,
    capabilities: &[Capability::Allocator],
    classify: |object| one(object.info.allocator.label()),
};

pub const ARRAY_LENGTH: FnClassifier = FnClassifier {
    name: "Array Length",
    description: "Array length in decimal buckets",
    example: "10-99",
    kind: ClassifierKind::One,
    source: SourceCollection::All,
    capabilities: &[Capability::Shape],
    classify: |object| one(length_bucket(object.info.array_length)),
};

pub const AGE: FnClassifier = FnClassifier {
    name: "Age",
    description: "Number of collections the object survived",
    example: "2",
    kind: ClassifierKind::One,
    source: SourceCollection::All,
    capabilities: &[Capability::Age],
    classify: |object| one(i64::from(object.age)),
};

pub const OBJECT_SHAPE: FnClassifier = FnClassifier {
    name: "Object Shape",
    description: "Instance, small array or big array",
    example: "Small Array",
    kind: ClassifierKind::One,
    source: SourceCollection::All,
    capabilities: &[Capability::Shape],
    classify: |object| one(object.info.shape().label()),
};

pub const ROOT_KIND: FnClassifier = FnClassifier {
    name: "Root Kind",
    description: "Kinds of GC roots pointing directly at the object",
    example: "JNI Global",
    kind: ClassifierKind::Many,
    source: SourceCollection::IndexBacked,
    capabilities: &[Capability::Roots],
    classify: |object| {
        let labels: BTreeSet<&str> = object.roots("Root Kind")?.iter().map(|r| r.label()).collect();
        Ok(Classification::Many(labels.into_iter().map(Key::from).collect()))
    },
};

pub const POINTED_FROM_TYPE: FnClassifier = FnClassifier {
    name: "Pointed From Type",
    description: "Types of the objects referencing the object",
    example: "java.util.HashMap$Node",
    kind: ClassifierKind::Many,
    source: SourceCollection::IndexBacked,
    capabilities: &[Capability::Pointers],
    classify: |object| {
        let (snapshot, _) = object.snapshot("Pointed From Type")?;
        let types: BTreeSet<&str> = object
            .pointed_from("Pointed From Type")?
            .iter()
            .map(|&from| {
                snapshot
                    .symbols()
                    .type_info(snapshot.object(from).info.type_id)
                    .map_or("unknown", |t| t.external_name())
            })
            .collect();
        Ok(Classification::Many(types.into_iter().map(Key::from).collect()))
    },
};

/// `None` -> `Instance`, `0` -> `0`, `1..=9` -> `1-9`, `10..=99` -> `10-99`, ...
#[must_use]
pub fn length_bucket(length: Option<u32>) -> String {
    match length {
        None => "Instance".to_string(),
        Some(0) => "0".to_string(),
        Some(n) => {
            let low = 10u64.pow(n.ilog10());
            format!("{low}-{}", low * 10 - 1)
        }
    }
}

// ============================================================================
// CONFIGURABLE CLASSIFIERS
// ============================================================================

/// Groups by allocated type.
#[derive(Debug, Clone)]
pub struct TypeClassifier {
    full_name: bool,
}

impl Default for TypeClassifier {
    fn default() -> Self {
        Self { full_name: true }
    }
}

impl Unit for TypeClassifier {
    fn name(&self) -> &str {
        "Type"
    }

    fn description(&self) -> &str {
        "Allocated type of the object"
    }

    fn example(&self) -> &str {
        "com.acme.Order"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Type]
    }

    fn properties(&self) -> Vec<Property> {
        vec![Property::new("full_name", PropertyKind::Bool, self.full_name)]
    }

    fn set_property(&mut self, name: &str, value: &str) -> Result<(), ClassificationError> {
        match name {
            "full_name" => self.full_name = parse_bool(self.name(), name, value)?,
            _ => return Err(invalid_property(self.name(), name, value)),
        }
        Ok(())
    }
}

impl Classifier for TypeClassifier {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::One
    }

    fn classify(&mut self, object: &ObjectContext<'_>) -> Result<Classification, ClassificationError> {
        let name = match object.allocated_type() {
            Some(ty) if self.full_name => ty.external_name(),
            Some(ty) => ty.short_name(),
            None => "unknown",
        };
        one(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameLabel {
    FullyQualified,
    OmitPackage,
    Shortest,
}

impl FrameLabel {
    const CHOICES: [&'static str; 3] = ["fully_qualified", "omit_package", "shortest"];

    fn name(self) -> &'static str {
        match self {
            FrameLabel::FullyQualified => Self::CHOICES[0],
            FrameLabel::OmitPackage => Self::CHOICES[1],
            FrameLabel::Shortest => Self::CHOICES[2],
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "fully_qualified" => Some(FrameLabel::FullyQualified),
            "omit_package" => Some(FrameLabel::OmitPackage),
            "shortest" => Some(FrameLabel::Shortest),
            _ => None,
        }
    }

    fn apply(self, location: &Location) -> String {
        let method = match self {
            FrameLabel::FullyQualified => location.fully_qualified(),
            FrameLabel::OmitPackage => location.omit_package(),
            FrameLabel::Shortest => location.shortest(),
        };
        format!("{method}:{}", location.bci())
    }
}

/// Nests objects by their allocating call stack, innermost frame first.
#[derive(Debug, Clone)]
pub struct CallSitesClassifier {
    /// `0` keeps every frame
    max_depth: usize,
    label: FrameLabel,
}

impl Default for CallSitesClassifier {
    fn default() -> Self {
        Self { max_depth: 0, label: FrameLabel::OmitPackage }
    }
}

impl Unit for CallSitesClassifier {
    fn name(&self) -> &str {
        "Call Sites"
    }

    fn description(&self) -> &str {
        "Allocating call stack as nested groups"
    }

    fn example(&self) -> &str {
        "Shop::buy():3 / Main::main(String[]):12"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::CallStack]
    }

    fn properties(&self) -> Vec<Property> {
        let choices = FrameLabel::CHOICES.iter().map(ToString::to_string).collect();
        vec![
            Property::new("max_depth", PropertyKind::Integer, self.max_depth),
            Property::new("label", PropertyKind::Choice(choices), self.label.name()),
        ]
    }

    fn set_property(&mut self, name: &str, value: &str) -> Result<(), ClassificationError> {
        let invalid = || invalid_property("Call Sites", name, value);
        match name {
            "max_depth" => self.max_depth = value.parse().map_err(|_| invalid())?,
            "label" => self.label = FrameLabel::parse(value).ok_or_else(invalid)?,
            _ => return Err(invalid()),
        }
        Ok(())
    }
}

impl Classifier for CallSitesClassifier {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Hierarchy
    }

    fn classify(&mut self, object: &ObjectContext<'_>) -> Result<Classification, ClassificationError> {
        let frames = object.site().call_sites();
        let depth = if self.max_depth == 0 { frames.len() } else { self.max_depth.min(frames.len()) };
        let path = frames[..depth].iter().map(|frame| Key::Text(self.label.apply(frame))).collect();
        Ok(Classification::Hierarchy(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_bucket() {
        assert_eq!(length_bucket(None), "Instance");
        assert_eq!(length_bucket(Some(0)), "0");
        assert_eq!(length_bucket(Some(7)), "1-9");
        assert_eq!(length_bucket(Some(10)), "10-99");
        assert_eq!(length_bucket(Some(999)), "100-999");
    }

    #[test]
    fn test_type_classifier_property() {
        let mut classifier = TypeClassifier::default();
        assert_eq!(classifier.properties()[0].value, "true");
        classifier.set_property("full_name", "false").unwrap();
        assert_eq!(classifier.properties()[0].value, "false");
        assert!(classifier.set_property("full_name", "maybe").is_err());
        assert!(classifier.set_property("colour", "red").is_err());
    }

    #[test]
    fn test_call_sites_properties() {
        let mut classifier = CallSitesClassifier::default();
        classifier.set_property("max_depth", "2").unwrap();
        classifier.set_property("label", "shortest").unwrap();
        let properties = classifier.properties();
        assert_eq!(properties[0].value, "2");
        assert_eq!(properties[1].value, "shortest");
        assert_eq!(properties[0].presentation_name, "Max Depth");
    }
}
