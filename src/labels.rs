//! Opaque tagged attributes attached to task definitions.
//!
//! Labels never change how a task runs; they carry declarative facts the
//! resolver and the application layer read back: which inspection types a
//! task applies to, whether it reports progress, whether it is a
//! user-toggleable feature.

use crate::typedmap::{TypedKey, TypedMap};

static FEATURE_KEY: &str = "feature";
static INSPECTION_TYPES_KEY: &str = "inspection-types";
static PROGRESS_REPORTABLE_KEY: &str = "progress-reportable";
static CACHEABLE_KEY: &str = "cacheable";

/// A user-visible feature toggle attached to a task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureLabel {
    pub title: String,
    pub description: String,
    pub default_enabled: bool,
    pub inspection_types: Vec<String>,
}

/// One label written into a [`LabelSet`] at task construction.
pub struct LabelOpt {
    write: Box<dyn Fn(&TypedMap) + Send + Sync>,
}

impl LabelOpt {
    fn new(write: impl Fn(&TypedMap) + Send + Sync + 'static) -> LabelOpt {
        LabelOpt { write: Box::new(write) }
    }
}

/// Marks a task as a feature the front-end may toggle.
pub fn feature(
    title: impl Into<String>,
    description: impl Into<String>,
    default_enabled: bool,
    inspection_types: impl IntoIterator<Item = impl Into<String>>,
) -> LabelOpt {
    let label = FeatureLabel {
        title: title.into(),
        description: description.into(),
        default_enabled,
        inspection_types: inspection_types.into_iter().map(Into::into).collect(),
    };
    LabelOpt::new(move |values| {
        values.set(&TypedKey::<FeatureLabel>::new(FEATURE_KEY), label.clone());
    })
}

/// Restricts a task to the given inspection types. Tasks without this label
/// are eligible under every inspection type.
pub fn inspection_types(types: impl IntoIterator<Item = impl Into<String>>) -> LabelOpt {
    let types: Vec<String> = types.into_iter().map(Into::into).collect();
    LabelOpt::new(move |values| {
        values.set(&TypedKey::<Vec<String>>::new(INSPECTION_TYPES_KEY), types.clone());
    })
}

/// Registers a progress slot for the task while it runs.
pub fn progress_reportable() -> LabelOpt {
    LabelOpt::new(|values| {
        values.set(&TypedKey::<bool>::new(PROGRESS_REPORTABLE_KEY), true);
    })
}

/// Marks a task as participating in result memoization.
pub fn cacheable() -> LabelOpt {
    LabelOpt::new(|values| {
        values.set(&TypedKey::<bool>::new(CACHEABLE_KEY), true);
    })
}

/// An application-defined label under a caller-chosen typed key.
pub fn custom<T: Clone + Send + Sync + 'static>(key: TypedKey<T>, value: T) -> LabelOpt {
    LabelOpt::new(move |values| {
        values.set(&key, value.clone());
    })
}

/// The label map of one task. Built once at task construction, read-only
/// afterwards.
#[derive(Clone, Debug, Default)]
pub struct LabelSet {
    values: TypedMap,
}

impl LabelSet {
    pub fn empty() -> LabelSet {
        LabelSet::default()
    }

    pub fn from_opts(opts: impl IntoIterator<Item = LabelOpt>) -> LabelSet {
        let set = LabelSet::default();
        for opt in opts {
            (opt.write)(&set.values);
        }
        set
    }

    /// Returns a copy of this set with one more label applied.
    pub(crate) fn with(&self, opt: LabelOpt) -> LabelSet {
        let set = LabelSet { values: self.values.clone() };
        (opt.write)(&set.values);
        set
    }

    pub fn feature(&self) -> Option<FeatureLabel> {
        self.values.get(&TypedKey::new(FEATURE_KEY))
    }

    /// The inspection types this task applies to; `None` means unrestricted.
    pub fn inspection_types(&self) -> Option<Vec<String>> {
        self.values.get(&TypedKey::new(INSPECTION_TYPES_KEY))
    }

    pub fn progress_reportable(&self) -> bool {
        self.values.get_or_default(&TypedKey::new(PROGRESS_REPORTABLE_KEY), false)
    }

    pub fn cacheable(&self) -> bool {
        self.values.get_or_default(&TypedKey::new(CACHEABLE_KEY), false)
    }

    /// Reads an application-defined label.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &TypedKey<T>) -> Option<T> {
        self.values.get(key)
    }

    /// Whether this task is eligible under `inspection_type`: eligible when
    /// unlabelled or when the label set includes the given type.
    pub fn matches_inspection_type(&self, inspection_type: &str) -> bool {
        match self.inspection_types() {
            None => true,
            Some(types) => types.iter().any(|t| t == inspection_type),
        }
    }
}
