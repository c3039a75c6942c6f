use std::sync::RwLock;

use serde::Serialize;
use thiserror::Error;

use super::Metadata;

/// The kind of input a form field renders as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
    File,
    Group,
}

/// The severity of the hint shown under a form field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HintType {
    None,
    Info,
    Warning,
    Error,
}

/// Fields shared by every parameter form field.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FormFieldBase {
    #[serde(skip)]
    pub priority: i32,
    pub id: String,
    #[serde(rename = "type")]
    pub input_type: InputType,
    pub label: String,
    pub description: String,
    #[serde(rename = "hintType")]
    pub hint_type: HintType,
    pub hint: String,
}

/// A text parameter with a default, optional autocomplete suggestions and a
/// readonly marker.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TextFormField {
    #[serde(flatten)]
    pub base: FormFieldBase,
    pub readonly: bool,
    pub default: String,
    pub suggestions: Option<Vec<String>>,
}

/// An uploaded-file parameter. The upload flow itself lives outside the
/// engine; the descriptor only names the field.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileFormField {
    #[serde(flatten)]
    pub base: FormFieldBase,
}

/// A grouping of related fields rendered together.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupFormField {
    #[serde(flatten)]
    pub base: FormFieldBase,
    pub children: Vec<FormField>,
}

/// One parameter form field descriptor.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FormField {
    Text(TextFormField),
    File(FileFormField),
    Group(GroupFormField),
}

impl FormField {
    pub fn base(&self) -> &FormFieldBase {
        match self {
            FormField::Text(field) => &field.base,
            FormField::File(field) => &field.base,
            FormField::Group(field) => &field.base,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormFieldError {
    #[error("form field id must not be empty")]
    EmptyId,

    #[error("form field id `{0}` is already used")]
    DuplicateId(String),
}

/// The ordered set of parameter fields produced during a dry run.
///
/// Fields sort by descending priority, ties keeping insertion order, so the
/// front-end renders them deterministically.
#[derive(Default)]
pub struct FormFieldSet {
    fields: RwLock<Vec<FormField>>,
}

impl FormFieldSet {
    pub fn new() -> FormFieldSet {
        FormFieldSet::default()
    }

    pub fn set_field(&self, field: FormField) -> Result<(), FormFieldError> {
        let mut fields = self.fields.write().unwrap();
        let base = field.base();
        if base.id.is_empty() {
            return Err(FormFieldError::EmptyId);
        }
        if fields.iter().any(|existing| existing.base().id == base.id) {
            return Err(FormFieldError::DuplicateId(base.id.clone()));
        }
        fields.push(field);
        fields.sort_by_key(|f| std::cmp::Reverse(f.base().priority));
        Ok(())
    }

    pub fn get_field(&self, id: &str) -> Option<FormField> {
        self.fields
            .read()
            .unwrap()
            .iter()
            .find(|field| field.base().id == id)
            .cloned()
    }

    pub fn fields(&self) -> Vec<FormField> {
        self.fields.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.fields.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.read().unwrap().is_empty()
    }
}

impl Metadata for FormFieldSet {
    fn kind(&self) -> &'static str {
        "form"
    }

    fn to_serializable(&self) -> serde_json::Value {
        serde_json::to_value(self.fields()).expect("form fields serialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_field(id: &str, priority: i32) -> FormField {
        FormField::Text(TextFormField {
            base: FormFieldBase {
                priority,
                id: id.to_string(),
                input_type: InputType::Text,
                label: id.to_string(),
                description: String::new(),
                hint_type: HintType::None,
                hint: String::new(),
            },
            readonly: false,
            default: String::new(),
            suggestions: None,
        })
    }

    #[test]
    fn fields_sort_by_descending_priority() {
        let set = FormFieldSet::new();
        set.set_field(text_field("low", 1)).unwrap();
        set.set_field(text_field("high", 10)).unwrap();
        set.set_field(text_field("mid", 5)).unwrap();
        let ids: Vec<String> = set.fields().iter().map(|f| f.base().id.clone()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[test]
    fn duplicate_field_ids_are_rejected() {
        let set = FormFieldSet::new();
        set.set_field(text_field("project-id", 1)).unwrap();
        assert_eq!(
            set.set_field(text_field("project-id", 2)),
            Err(FormFieldError::DuplicateId("project-id".to_string()))
        );
    }

    #[test]
    fn empty_field_ids_are_rejected() {
        let set = FormFieldSet::new();
        assert_eq!(set.set_field(text_field("", 1)), Err(FormFieldError::EmptyId));
    }

    #[test]
    fn serializes_with_the_stable_field_names() {
        let set = FormFieldSet::new();
        let mut field = text_field("project-id", 1);
        if let FormField::Text(text) = &mut field {
            text.base.hint_type = HintType::Error;
            text.base.hint = "Project ID must not be empty".to_string();
            text.default = "foo-project".to_string();
            text.suggestions = Some(vec!["foo-project".to_string()]);
        }
        set.set_field(field).unwrap();
        let value = set.to_serializable();
        let entry = &value.as_array().unwrap()[0];
        assert_eq!(entry["id"], "project-id");
        assert_eq!(entry["type"], "text");
        assert_eq!(entry["hintType"], "error");
        assert_eq!(entry["hint"], "Project ID must not be empty");
        assert_eq!(entry["default"], "foo-project");
        assert_eq!(entry["readonly"], false);
        assert_eq!(entry["suggestions"][0], "foo-project");
        assert!(entry.get("priority").is_none());
    }
}
