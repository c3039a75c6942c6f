use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

static REF_TAG_SEPARATOR: char = '#';
static DEFAULT_TAG: &str = "default";

macro_rules! fmt_debug_as_display {
    () => {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Display::fmt(self, f)
        }
    };
}

/// A typed reference to the *role* a task plays in the graph.
///
/// A reference names the value a task produces, not the code producing it:
/// several implementations may share one reference, and dependants declare
/// the reference without knowing which implementation will be selected.
/// Equality is by identifier string; the type parameter exists so that
/// reading a result through a reference yields the right type.
///
pub struct TaskRef<T: ?Sized> {
    id: String,
    _result: PhantomData<fn() -> T>,
}

impl<T: ?Sized> TaskRef<T> {
    /// Creates a reference with the given identifier.
    ///
    /// Panics when `id` contains `#`, which is reserved to separate the
    /// reference from the implementation tag in a [`TaskId`].
    pub fn new(id: impl Into<String>) -> TaskRef<T> {
        let id = id.into();
        if id.contains(REF_TAG_SEPARATOR) {
            panic!("reference id `{}` is invalid: it must not contain '#'", id);
        }
        TaskRef {
            id,
            _result: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T: 'static> TaskRef<T> {
    /// Binds this reference to a concrete implementation tag.
    ///
    /// Panics when `tag` is empty.
    pub fn implementation(&self, tag: impl Into<String>) -> TaskId<T> {
        let tag = tag.into();
        if tag.is_empty() {
            panic!("implementation tag for `{}` must not be empty", self.id);
        }
        TaskId {
            reference: self.clone(),
            tag,
        }
    }

    pub fn untyped(&self) -> UntypedTaskRef {
        UntypedTaskRef {
            id: self.id.clone(),
            result_type: TypeId::of::<T>(),
            result_type_name: std::any::type_name::<T>(),
        }
    }
}

impl<T: ?Sized> Clone for TaskRef<T> {
    fn clone(&self) -> Self {
        TaskRef {
            id: self.id.clone(),
            _result: PhantomData,
        }
    }
}

impl<T: ?Sized> fmt::Display for TaskRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl<T: ?Sized> fmt::Debug for TaskRef<T> {
    fmt_debug_as_display!();
}

impl<T: ?Sized> PartialEq for TaskRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: ?Sized> Eq for TaskRef<T> {}

/// A type-erased [`TaskRef`], used in dependency lists.
///
/// Carries the `TypeId` of the produced value so the resolver can verify
/// that the selected provider yields what the dependant expects.
#[derive(Clone)]
pub struct UntypedTaskRef {
    id: String,
    result_type: TypeId,
    result_type_name: &'static str,
}

impl UntypedTaskRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn result_type(&self) -> TypeId {
        self.result_type
    }

    pub(crate) fn result_type_name(&self) -> &'static str {
        self.result_type_name
    }
}

impl fmt::Display for UntypedTaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for UntypedTaskRef {
    fmt_debug_as_display!();
}

impl PartialEq for UntypedTaskRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for UntypedTaskRef {}

impl Hash for UntypedTaskRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// The identifier of one task implementation: a reference plus a tag.
///
/// Canonical string form is `<ref>#<tag>`; the tag defaults to `default`.
/// At most one implementation of a reference may appear in a resolved set.
pub struct TaskId<T> {
    reference: TaskRef<T>,
    tag: String,
}

impl<T: 'static> TaskId<T> {
    /// Shorthand for `TaskRef::new(id).implementation("default")`.
    pub fn new(id: impl Into<String>) -> TaskId<T> {
        TaskRef::new(id).implementation(DEFAULT_TAG)
    }

    pub fn reference(&self) -> &TaskRef<T> {
        &self.reference
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn untyped(&self) -> UntypedTaskId {
        UntypedTaskId {
            reference: self.reference.untyped(),
            tag: self.tag.clone(),
        }
    }
}

impl<T> Clone for TaskId<T> {
    fn clone(&self) -> Self {
        TaskId {
            reference: self.reference.clone(),
            tag: self.tag.clone(),
        }
    }
}

impl<T> fmt::Display for TaskId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.reference.id, REF_TAG_SEPARATOR, self.tag)
    }
}

impl<T> fmt::Debug for TaskId<T> {
    fmt_debug_as_display!();
}

impl<T> PartialEq for TaskId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference && self.tag == other.tag
    }
}

impl<T> Eq for TaskId<T> {}

/// A type-erased [`TaskId`].
#[derive(Clone)]
pub struct UntypedTaskId {
    reference: UntypedTaskRef,
    tag: String,
}

impl UntypedTaskId {
    pub fn reference(&self) -> &UntypedTaskRef {
        &self.reference
    }

    pub fn reference_id(&self) -> &str {
        self.reference.id()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for UntypedTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.reference.id(), REF_TAG_SEPARATOR, self.tag)
    }
}

impl fmt::Debug for UntypedTaskId {
    fmt_debug_as_display!();
}

impl PartialEq for UntypedTaskId {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference && self.tag == other.tag
    }
}

impl Eq for UntypedTaskId {}

impl Hash for UntypedTaskId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.reference.hash(state);
        self.tag.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_default_implementation_ids() {
        let id: TaskId<String> = TaskId::new("parse/logs");
        assert_eq!(id.to_string(), "parse/logs#default");
        assert_eq!(id.reference().id(), "parse/logs");
        assert_eq!(id.tag(), "default");
    }

    #[test]
    fn builds_tagged_implementation_ids() {
        let reference: TaskRef<String> = TaskRef::new("log-input");
        let id = reference.implementation("cloud-logging");
        assert_eq!(id.to_string(), "log-input#cloud-logging");
        assert_eq!(id.reference(), &reference);
    }

    #[test]
    #[should_panic(expected = "must not contain '#'")]
    fn rejects_reference_ids_containing_the_separator() {
        let _: TaskRef<String> = TaskRef::new("log-input#file");
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn rejects_empty_implementation_tags() {
        let reference: TaskRef<String> = TaskRef::new("log-input");
        let _ = reference.implementation("");
    }

    #[test]
    fn references_with_equal_ids_are_interchangeable() {
        let a: TaskRef<u64> = TaskRef::new("count");
        let b: TaskRef<u64> = TaskRef::new("count");
        assert_eq!(a, b);
        assert_eq!(a.untyped(), b.untyped());
    }

    #[test]
    fn implementations_of_one_reference_differ_by_tag() {
        let reference: TaskRef<String> = TaskRef::new("log-input");
        let cloud = reference.implementation("cloud-logging").untyped();
        let file = reference.implementation("file").untyped();
        assert_ne!(cloud, file);
        assert_eq!(cloud.reference(), file.reference());
    }

    #[test]
    fn untyped_references_remember_the_result_type() {
        let typed: TaskRef<u64> = TaskRef::new("count");
        let untyped = typed.untyped();
        assert_eq!(untyped.result_type(), std::any::TypeId::of::<u64>());
        assert!(untyped.result_type_name().contains("u64"));
    }
}
