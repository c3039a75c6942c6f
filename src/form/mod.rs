//! Form-field tasks: parameter inputs modelled as graph tasks.
//!
//! A form field is an ordinary task that computes its converted value from
//! the inspection request and writes its descriptor into the `form`
//! metadata aggregate. During form editing the graph runs in dry-run mode
//! and validation problems surface through field hints; in run mode they
//! fail the task.

mod text;

pub use text::TextFieldBuilder;
