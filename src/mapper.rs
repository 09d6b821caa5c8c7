//! # User-Facing Message Mapping
//!
//! Turns a typed [`AppError`] plus optional [`Context`] into the message end
//! users actually see. Three mappers share one contract: they never fail,
//! any lookup that comes up empty falls back to the internal-error template.
//!
//! Template strings use a fixed `{key}` substitution grammar. Unknown keys
//! are left literal rather than silently dropped, so a typo in a template
//! shows up in the rendered text instead of vanishing in production.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::types::{AppError, ErrorCode, Severity};

/// The message presented to an end user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    /// Short heading
    pub title: String,
    /// The body text
    pub message: String,
    /// Severity carried through for styling/alerting
    pub severity: Severity,
    /// Suggested next steps
    pub actions: Vec<String>,
    /// Optional longer help text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    /// Whether the UI may auto-dismiss the message
    pub dismissible: bool,
}

/// A template before placeholder substitution
#[derive(Debug, Clone)]
struct MessageTemplate {
    title: &'static str,
    message: &'static str,
    actions: &'static [&'static str],
    help_text: Option<&'static str>,
    dismissible: bool,
}

impl MessageTemplate {
    const fn new(title: &'static str, message: &'static str) -> Self {
        Self {
            title,
            message,
            actions: &[],
            help_text: None,
            dismissible: true,
        }
    }
}

/// Common capability of all mappers
pub trait ErrorMapper {
    /// Maps an error and optional context to a user-facing message.
    /// Total: never panics and never errors.
    fn map_error(&self, error: &AppError, context: Option<&Context>) -> UserMessage;
}

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder grammar is valid"));

static GENERIC_TEMPLATES: Lazy<HashMap<ErrorCode, MessageTemplate>> = Lazy::new(|| {
    let mut t = HashMap::new();
    t.insert(
        ErrorCode::Validation,
        MessageTemplate {
            title: "Check your input",
            message: "Please check your input and try again.",
            actions: &["Review the highlighted fields", "Submit again"],
            help_text: None,
            dismissible: true,
        },
    );
    t.insert(
        ErrorCode::Authentication,
        MessageTemplate::new("Sign in required", "Please sign in to continue."),
    );
    t.insert(
        ErrorCode::Authorization,
        MessageTemplate::new(
            "Not allowed",
            "You do not have permission to perform this action.",
        ),
    );
    t.insert(
        ErrorCode::NotFound,
        MessageTemplate::new(
            "Not found",
            "The requested {resource} could not be found.",
        ),
    );
    t.insert(
        ErrorCode::Processing,
        MessageTemplate {
            title: "Processing failed",
            message: "We could not process your request. Please try again.",
            actions: &["Try again"],
            help_text: Some("If the problem persists, contact support with reference {error_id}."),
            dismissible: true,
        },
    );
    t.insert(
        ErrorCode::ServiceUnavailable,
        MessageTemplate::new(
            "Service unavailable",
            "The service is temporarily unavailable. Please try again shortly.",
        ),
    );
    t.insert(
        ErrorCode::RateLimit,
        MessageTemplate::new(
            "Slow down",
            "Too many requests. Please wait {retry_after} seconds and try again.",
        ),
    );
    t.insert(
        ErrorCode::Timeout,
        MessageTemplate::new(
            "Operation timed out",
            "The operation took too long. Please try again.",
        ),
    );
    t.insert(
        ErrorCode::Internal,
        MessageTemplate {
            title: "Something went wrong",
            message: "Something went wrong on our side. Please try again later.",
            actions: &["Try again later"],
            help_text: Some("Reference {error_id} when contacting support."),
            dismissible: false,
        },
    );
    t
});

// Operation-substring overrides, matched against `context.operation` before
// the per-code table. First match wins.
static OPERATION_OVERRIDES: Lazy<Vec<(&'static str, ErrorCode, MessageTemplate)>> =
    Lazy::new(|| {
        vec![
            (
                "file_upload",
                ErrorCode::Validation,
                MessageTemplate {
                    title: "Upload failed",
                    message: "Your file could not be uploaded. Check the file type and size, then try again.",
                    actions: &["Use PDF, PNG, or JPEG", "Keep files under the size limit"],
                    help_text: None,
                    dismissible: true,
                },
            ),
            (
                "grading",
                ErrorCode::Processing,
                MessageTemplate {
                    title: "Grading incomplete",
                    message: "Grading could not be completed for this submission. Your work is saved; please retry.",
                    actions: &["Retry grading"],
                    help_text: Some("Reference {error_id} if this keeps happening."),
                    dismissible: true,
                },
            ),
            (
                "ocr",
                ErrorCode::Processing,
                MessageTemplate {
                    title: "Could not read submission",
                    message: "We could not read the text in this submission. Try uploading a clearer scan.",
                    actions: &["Re-scan at a higher resolution", "Upload again"],
                    help_text: None,
                    dismissible: true,
                },
            ),
        ]
    });

fn internal_template() -> &'static MessageTemplate {
    // The Internal entry always exists; it is the fallback of last resort.
    GENERIC_TEMPLATES
        .get(&ErrorCode::Internal)
        .expect("internal template is always present")
}

fn substitution_vars(error: &AppError, context: Option<&Context>) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("error_id".to_string(), error.id.to_string());
    if let Some(field) = &error.field {
        vars.insert("field".to_string(), field.clone());
    }
    if let Some(retry_after) = error.retry_after {
        vars.insert("retry_after".to_string(), retry_after.to_string());
    }
    if let Some(ctx) = context {
        vars.insert("operation".to_string(), ctx.operation.clone());
        if let Some(resource) = ctx.data.get("resource").and_then(|v| v.as_str()) {
            vars.insert("resource".to_string(), resource.to_string());
        }
    }
    for (key, value) in &error.details {
        let rendered = match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        };
        vars.insert(key.clone(), rendered);
    }
    vars
}

fn render(template: &str, vars: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match vars.get(&caps[1]) {
                Some(value) => value.clone(),
                // Unknown keys stay literal
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn build_message(
    template: &MessageTemplate,
    error: &AppError,
    context: Option<&Context>,
) -> UserMessage {
    let vars = substitution_vars(error, context);
    UserMessage {
        title: render(template.title, &vars),
        message: render(template.message, &vars),
        severity: error.severity,
        actions: template
            .actions
            .iter()
            .map(|a| render(a, &vars))
            .collect(),
        help_text: template.help_text.map(|h| render(h, &vars)),
        dismissible: template.dismissible,
    }
}

/// Per-code template lookup with operation-substring overrides
#[derive(Debug, Default, Clone)]
pub struct GenericMapper;

impl GenericMapper {
    /// Creates the generic mapper
    pub fn new() -> Self {
        Self
    }

    fn lookup(&self, error: &AppError, context: Option<&Context>) -> &'static MessageTemplate {
        if let Some(ctx) = context {
            for (pattern, code, template) in OPERATION_OVERRIDES.iter() {
                if *code == error.code && ctx.operation.contains(pattern) {
                    return template;
                }
            }
        }
        GENERIC_TEMPLATES
            .get(&error.code)
            .unwrap_or_else(|| internal_template())
    }
}

impl ErrorMapper for GenericMapper {
    fn map_error(&self, error: &AppError, context: Option<&Context>) -> UserMessage {
        build_message(self.lookup(error, context), error, context)
    }
}

static LOCALIZED_TEMPLATES: Lazy<HashMap<&'static str, HashMap<ErrorCode, MessageTemplate>>> =
    Lazy::new(|| {
        let mut languages = HashMap::new();

        // Spanish carries a partial table; anything missing falls back to the
        // base-language table, and unknown languages fall back to the generic
        // mapper entirely.
        let mut es = HashMap::new();
        es.insert(
            ErrorCode::Validation,
            MessageTemplate::new(
                "Revise sus datos",
                "Por favor revise los datos ingresados e intente nuevamente.",
            ),
        );
        es.insert(
            ErrorCode::RateLimit,
            MessageTemplate::new(
                "Demasiadas solicitudes",
                "Demasiadas solicitudes. Espere {retry_after} segundos e intente nuevamente.",
            ),
        );
        es.insert(
            ErrorCode::Internal,
            MessageTemplate::new(
                "Algo salió mal",
                "Algo salió mal de nuestro lado. Intente nuevamente más tarde.",
            ),
        );
        languages.insert("es", es);

        languages
    });

/// Language-aware mapper layering localized tables over the generic mapper
#[derive(Debug, Default, Clone)]
pub struct LocalizedMapper {
    generic: GenericMapper,
}

impl LocalizedMapper {
    /// Creates the localized mapper
    pub fn new() -> Self {
        Self {
            generic: GenericMapper::new(),
        }
    }
}

impl ErrorMapper for LocalizedMapper {
    fn map_error(&self, error: &AppError, context: Option<&Context>) -> UserMessage {
        let language = context.and_then(|c| c.language.as_deref());
        match language.and_then(|lang| LOCALIZED_TEMPLATES.get(lang)) {
            Some(table) => match table.get(&error.code) {
                Some(template) => build_message(template, error, context),
                // Known language, no entry for this code: base language
                None => self.generic.map_error(error, context),
            },
            // Unknown or unspecified language: generic table
            None => self.generic.map_error(error, context),
        }
    }
}

// Field-specific validation messages, keyed by (field, validation_type).
static FIELD_TEMPLATES: Lazy<HashMap<(&'static str, &'static str), MessageTemplate>> =
    Lazy::new(|| {
        let mut t = HashMap::new();
        t.insert(
            ("email", "required"),
            MessageTemplate::new("Email required", "Email address is required."),
        );
        t.insert(
            ("email", "invalid"),
            MessageTemplate::new("Invalid email", "Please enter a valid email address."),
        );
        t.insert(
            ("file", "too_large"),
            MessageTemplate::new(
                "File too large",
                "The uploaded file exceeds the maximum allowed size.",
            ),
        );
        t.insert(
            ("file", "invalid"),
            MessageTemplate::new(
                "Unsupported file",
                "The uploaded file type is not supported. Use PDF, PNG, or JPEG.",
            ),
        );
        t.insert(
            ("score", "invalid"),
            MessageTemplate::new(
                "Invalid score",
                "Scores must be numeric and within the rubric range.",
            ),
        );
        t
    });

/// Adds field-level specificity for validation errors on top of the
/// localized pipeline
#[derive(Debug, Default, Clone)]
pub struct ContextAwareMapper {
    localized: LocalizedMapper,
}

impl ContextAwareMapper {
    /// Creates the context-aware mapper
    pub fn new() -> Self {
        Self {
            localized: LocalizedMapper::new(),
        }
    }
}

impl ErrorMapper for ContextAwareMapper {
    fn map_error(&self, error: &AppError, context: Option<&Context>) -> UserMessage {
        if error.code == ErrorCode::Validation {
            if let Some(field) = error.field.as_deref() {
                let validation_type = error
                    .details
                    .get("validation_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("invalid");
                if let Some(template) = FIELD_TEMPLATES.get(&(field, validation_type)) {
                    return build_message(template, error, context);
                }
            }
        }
        self.localized.map_error(error, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_template_per_code() {
        let mapper = GenericMapper::new();
        let err = AppError::new(ErrorCode::Authentication, "no session");
        let msg = mapper.map_error(&err, None);
        assert_eq!(msg.message, "Please sign in to continue.");
        assert_eq!(msg.severity, err.severity);
    }

    #[test]
    fn test_retry_after_substitution() {
        let mapper = GenericMapper::new();
        let err = AppError::new(ErrorCode::RateLimit, "throttled");
        let msg = mapper.map_error(&err, None);
        assert_eq!(
            msg.message,
            "Too many requests. Please wait 60 seconds and try again."
        );
    }

    #[test]
    fn test_unknown_placeholder_stays_literal() {
        let mapper = GenericMapper::new();
        // NotFound references {resource}; with no context it stays literal.
        let err = AppError::new(ErrorCode::NotFound, "no such guide");
        let msg = mapper.map_error(&err, None);
        assert_eq!(msg.message, "The requested {resource} could not be found.");

        let ctx = Context::new("view_guide").add("resource", "marking guide");
        let msg = mapper.map_error(&err, Some(&ctx));
        assert_eq!(msg.message, "The requested marking guide could not be found.");
    }

    #[test]
    fn test_operation_override() {
        let mapper = GenericMapper::new();
        let err = AppError::new(ErrorCode::Processing, "ocr engine crashed");
        let ctx = Context::new("ocr_submission");
        let msg = mapper.map_error(&err, Some(&ctx));
        assert_eq!(msg.title, "Could not read submission");
    }

    #[test]
    fn test_details_feed_substitution() {
        let mapper = GenericMapper::new();
        let err = AppError::new(ErrorCode::Internal, "boom");
        let msg = mapper.map_error(&err, None);
        let help = msg.help_text.unwrap();
        assert!(help.contains(&err.id.to_string()));
    }

    #[test]
    fn test_localized_lookup_and_fallbacks() {
        let mapper = LocalizedMapper::new();
        let err = AppError::new(ErrorCode::Validation, "bad");

        let es = Context::new("op").language("es");
        let msg = mapper.map_error(&err, Some(&es));
        assert!(msg.message.starts_with("Por favor"));

        // Known language, code missing from its table: base-language text
        let timeout = AppError::new(ErrorCode::Timeout, "slow");
        let msg = mapper.map_error(&timeout, Some(&es));
        assert_eq!(msg.message, "The operation took too long. Please try again.");

        // Unknown language: generic table
        let de = Context::new("op").language("de");
        let msg = mapper.map_error(&err, Some(&de));
        assert_eq!(msg.message, "Please check your input and try again.");
    }

    #[test]
    fn test_context_aware_field_specific_message() {
        let mapper = ContextAwareMapper::new();
        let err = AppError::new(ErrorCode::Validation, "email format check failed")
            .field("email")
            .detail("validation_type", "invalid");
        let msg = mapper.map_error(&err, None);
        assert_eq!(msg.message, "Please enter a valid email address.");

        let err = AppError::new(ErrorCode::Validation, "email missing")
            .field("email")
            .detail("validation_type", "required");
        let msg = mapper.map_error(&err, None);
        assert_eq!(msg.message, "Email address is required.");
    }

    #[test]
    fn test_context_aware_defaults_to_invalid_discriminator() {
        let mapper = ContextAwareMapper::new();
        let err = AppError::new(ErrorCode::Validation, "bad email").field("email");
        let msg = mapper.map_error(&err, None);
        assert_eq!(msg.message, "Please enter a valid email address.");
    }

    #[test]
    fn test_unknown_field_falls_through_to_generic() {
        let mapper = ContextAwareMapper::new();
        let err = AppError::new(ErrorCode::Validation, "bad").field("rubric_weight");
        let msg = mapper.map_error(&err, None);
        assert_eq!(msg.message, "Please check your input and try again.");
    }
}
