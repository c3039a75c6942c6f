use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::context::{RunMode, TaskContext};
use crate::labels::LabelOpt;
use crate::metadata::form::{
    FormField, FormFieldBase, FormFieldSet, HintType, InputType, TextFormField,
};
use crate::task::{Task, TaskValue};
use crate::taskid::{TaskId, UntypedTaskRef};
use crate::typedmap::TypedKey;

type DefaultFn =
    Arc<dyn Fn(TaskContext, Vec<String>) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;
type ValidatorFn = Arc<
    dyn Fn(TaskContext, String) -> BoxFuture<'static, anyhow::Result<Option<String>>> + Send + Sync,
>;
type ReadonlyFn =
    Arc<dyn Fn(TaskContext) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;
type SuggestionsFn = Arc<
    dyn Fn(TaskContext, String, Vec<String>) -> BoxFuture<'static, anyhow::Result<Option<Vec<String>>>>
        + Send
        + Sync,
>;
type ConvertFn<T> =
    Arc<dyn Fn(TaskContext, String) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;
type HintFn<T> = Arc<
    dyn Fn(TaskContext, String, T) -> BoxFuture<'static, anyhow::Result<(String, HintType)>>
        + Send
        + Sync,
>;

fn constant_hint<T: TaskValue>() -> HintFn<T> {
    Arc::new(|_ctx, _value, _converted| {
        futures::future::ready(Ok((String::new(), HintType::Info))).boxed()
    })
}

/// Builds the task behind one text input field.
///
/// Every option closure receives the task context, so defaults, validation
/// and suggestions may read upstream results. The produced task returns the
/// converted value and registers its field descriptor in the `form`
/// metadata.
///
/// A converter changes the produced type, so set it before the hint closure
/// (which receives the converted value).
pub struct TextFieldBuilder<T: TaskValue> {
    id: String,
    priority: i32,
    label: String,
    description: String,
    deps: Vec<UntypedTaskRef>,
    default_fn: DefaultFn,
    validator: ValidatorFn,
    readonly_fn: ReadonlyFn,
    suggestions_fn: SuggestionsFn,
    converter: ConvertFn<T>,
    hint_fn: HintFn<T>,
}

impl TextFieldBuilder<String> {
    /// A builder with pass-through behavior: empty default, always-valid
    /// validation, editable, no suggestions, identity conversion.
    pub fn new(id: impl Into<String>, priority: i32, label: impl Into<String>) -> Self {
        TextFieldBuilder {
            id: id.into(),
            priority,
            label: label.into(),
            description: String::new(),
            deps: Vec::new(),
            default_fn: Arc::new(|_ctx, _previous| {
                futures::future::ready(Ok(String::new())).boxed()
            }),
            validator: Arc::new(|_ctx, _value| futures::future::ready(Ok(None)).boxed()),
            readonly_fn: Arc::new(|_ctx| futures::future::ready(Ok(false)).boxed()),
            suggestions_fn: Arc::new(|_ctx, _value, _previous| {
                futures::future::ready(Ok(None)).boxed()
            }),
            converter: Arc::new(|_ctx, value| futures::future::ready(Ok(value)).boxed()),
            hint_fn: constant_hint::<String>(),
        }
    }
}

impl<T: TaskValue> TextFieldBuilder<T> {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<UntypedTaskRef>) -> Self {
        self.deps = deps;
        self
    }

    pub fn with_default_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TaskContext, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        self.default_fn = Arc::new(move |ctx, previous| f(ctx, previous).boxed());
        self
    }

    /// A constant default. With `prefer_previous`, the most recent run-mode
    /// value of this field takes precedence.
    pub fn with_default(self, value: impl Into<String>, prefer_previous: bool) -> Self {
        let value = value.into();
        self.with_default_fn(move |_ctx, previous| {
            let value = value.clone();
            async move {
                if prefer_previous {
                    if let Some(latest) = previous.first() {
                        return Ok(latest.clone());
                    }
                }
                Ok(value)
            }
        })
    }

    /// `Ok(None)` accepts the value; `Ok(Some(message))` rejects it with a
    /// user-facing message; `Err` is an unrecoverable failure.
    pub fn with_validator<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TaskContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
    {
        self.validator = Arc::new(move |ctx, value| f(ctx, value).boxed());
        self
    }

    pub fn with_readonly_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.readonly_fn = Arc::new(move |ctx| f(ctx).boxed());
        self
    }

    pub fn with_readonly(self, readonly: bool) -> Self {
        self.with_readonly_fn(move |_ctx| async move { Ok(readonly) })
    }

    pub fn with_suggestions_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TaskContext, String, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Vec<String>>>> + Send + 'static,
    {
        self.suggestions_fn = Arc::new(move |ctx, value, previous| f(ctx, value, previous).boxed());
        self
    }

    pub fn with_suggestions(self, suggestions: Vec<String>) -> Self {
        self.with_suggestions_fn(move |_ctx, _value, _previous| {
            let suggestions = suggestions.clone();
            async move { Ok(Some(suggestions)) }
        })
    }

    pub fn with_hint_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TaskContext, String, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<(String, HintType)>> + Send + 'static,
    {
        self.hint_fn = Arc::new(move |ctx, value, converted| f(ctx, value, converted).boxed());
        self
    }

    /// Converts the validated text into the task's result type. Resets the
    /// hint closure, which is typed by the converted value.
    pub fn with_converter<U, F, Fut>(self, f: F) -> TextFieldBuilder<U>
    where
        U: TaskValue,
        F: Fn(TaskContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        TextFieldBuilder {
            id: self.id,
            priority: self.priority,
            label: self.label,
            description: self.description,
            deps: self.deps,
            default_fn: self.default_fn,
            validator: self.validator,
            readonly_fn: self.readonly_fn,
            suggestions_fn: self.suggestions_fn,
            converter: Arc::new(move |ctx, value| f(ctx, value).boxed()),
            hint_fn: constant_hint::<U>(),
        }
    }

    pub fn build(self) -> Task<T> {
        self.build_with_labels(vec![])
    }

    pub fn build_with_labels(self, label_opts: Vec<LabelOpt>) -> Task<T> {
        let id = TaskId::<T>::new(self.id.clone());
        let deps = self.deps.clone();
        let field = Arc::new(self);
        Task::with_labels(id, deps, label_opts, move |ctx| {
            let field = field.clone();
            async move { field.execute(ctx).await }
        })
    }

    async fn execute(&self, ctx: TaskContext) -> anyhow::Result<T> {
        let history_key =
            TypedKey::<Vec<String>>::new(format!("text-field-history/{}", self.id));
        let previous = ctx.shared_state().get_or_default(&history_key, Vec::new());

        let readonly = (self.readonly_fn)(ctx.clone())
            .await
            .with_context(|| format!("readonly provider for field `{}` failed", self.id))?;

        let default_value = (self.default_fn)(ctx.clone(), previous.clone())
            .await
            .with_context(|| format!("default value generator for field `{}` failed", self.id))?;

        let mut current = default_value.clone();
        if !readonly {
            if let Some(raw) = ctx.request().get(&self.id) {
                let text = raw
                    .as_str()
                    .ok_or_else(|| anyhow!("request parameter `{}` must be a string", self.id))?;
                current = text.to_string();
            }
        }

        let suggestions = (self.suggestions_fn)(ctx.clone(), current.clone(), previous.clone())
            .await
            .with_context(|| format!("suggestions provider for field `{}` failed", self.id))?;

        let validation_error = (self.validator)(ctx.clone(), current.clone())
            .await
            .with_context(|| format!("validator for field `{}` failed", self.id))?;

        if let Some(message) = &validation_error {
            // invalid input falls back to the default value
            current = (self.default_fn)(ctx.clone(), previous.clone())
                .await
                .with_context(|| {
                    format!("default value generator for field `{}` failed", self.id)
                })?;
            if ctx.mode() == RunMode::Run {
                bail!(
                    "field `{}` has an unresolved validation error: {}",
                    self.id,
                    message
                );
            }
        }

        let converted = (self.converter)(ctx.clone(), current.clone())
            .await
            .with_context(|| {
                format!("converting value `{}` for field `{}` failed", current, self.id)
            })?;

        let (hint, hint_type) = match &validation_error {
            Some(message) => (message.clone(), HintType::Error),
            None => {
                let (hint, hint_type) =
                    (self.hint_fn)(ctx.clone(), current.clone(), converted.clone())
                        .await
                        .with_context(|| {
                            format!("hint generator for field `{}` failed", self.id)
                        })?;
                let hint_type = if hint.is_empty() { HintType::None } else { hint_type };
                if ctx.mode() == RunMode::Run {
                    let mut history = Vec::with_capacity(previous.len() + 1);
                    history.push(current.clone());
                    history.extend(previous.iter().cloned());
                    ctx.shared_state().set(&history_key, history);
                }
                (hint, hint_type)
            }
        };

        let descriptor = FormField::Text(TextFormField {
            base: FormFieldBase {
                priority: self.priority,
                id: self.id.clone(),
                input_type: InputType::Text,
                label: self.label.clone(),
                description: self.description.clone(),
                hint_type,
                hint,
            },
            readonly,
            default: default_value,
            suggestions,
        });
        ctx.metadata()
            .get_or_init::<FormFieldSet>()
            .set_field(descriptor)
            .with_context(|| format!("registering the form field `{}` failed", self.id))?;

        Ok(converted)
    }
}
