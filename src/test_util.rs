//! Shared test helpers

use crate::{Environment, Error, Value};

/// Assert a result is the `Err` variant and the stringified error chain
/// contains the given message
macro_rules! assert_err {
    ($expr:expr, $message:expr) => {{
        let message = $message;
        let error = match $expr {
            Ok(value) => panic!(
                "Expected error containing {message:?}, got Ok({value:?})"
            ),
            Err(error) => error,
        };
        // Include all source errors so wrappers don't hide the important
        // stuff
        let actual = anyhow::Error::from(error)
            .chain()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(": ");
        assert!(
            actual.contains(message),
            "Expected error message to contain {message:?}, but was: \
             {actual:?}"
        );
    }};
}
pub(crate) use assert_err;

/// Parse and render a template against a default environment, with
/// globals given as JSON
pub(crate) fn render(
    template: &str,
    globals: serde_json::Value,
) -> Result<String, Error> {
    render_with(&Environment::default(), template, globals)
}

/// Parse and render a template against the given environment
pub(crate) fn render_with(
    env: &Environment,
    template: &str,
    globals: serde_json::Value,
) -> Result<String, Error> {
    let template = env.parse(template)?;
    template.render(env, globals_object(globals))
}

/// Convert a `json!` literal into a globals mapping
pub(crate) fn globals_object(globals: serde_json::Value) -> crate::Object {
    match Value::from_json(globals) {
        Value::Object(object) => object,
        other => panic!("globals must be a JSON object, got {other}"),
    }
}
