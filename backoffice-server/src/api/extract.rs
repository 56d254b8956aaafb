//! Request extractors

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use shared::error::{AppError, ErrorCode};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// JSON body that has passed `validator` checks
///
/// Every failing field becomes one `{path, problem}` detail of a
/// `VALIDATION_FAILED` error.
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(json_rejection)?;
        value.validate().map_err(validation_error)?;
        Ok(Self(value))
    }
}

/// JSON body whose rejection uses the error envelope
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(json_rejection)?;
        Ok(Self(value))
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    match rejection {
        JsonRejection::JsonDataError(e) => AppError::validation(e.body_text()),
        JsonRejection::JsonSyntaxError(e) => {
            AppError::with_message(ErrorCode::InvalidRequest, e.body_text())
        }
        other => AppError::with_message(ErrorCode::InvalidRequest, other.body_text()),
    }
}

pub fn validation_error(errors: ValidationErrors) -> AppError {
    let mut problems = Vec::new();
    flatten("", &errors, &mut problems);
    problems.sort();

    let summary = problems
        .iter()
        .map(|(path, problem)| format!("{path}: {problem}"))
        .collect::<Vec<_>>()
        .join("; ");
    problems
        .into_iter()
        .fold(AppError::validation(summary), |err, (path, problem)| {
            err.with_detail(path, problem)
        })
}

fn flatten(prefix: &str, errors: &ValidationErrors, out: &mut Vec<(String, String)>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for e in list {
                    let problem = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string());
                    out.push((path.clone(), problem));
                }
            }
            ValidationErrorsKind::Struct(inner) => flatten(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (i, inner) in items {
                    flatten(&format!("{path}.{i}"), inner, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{PurchaseOrderCreate, PurchaseOrderLineInput};

    #[test]
    fn test_nested_paths() {
        let input = PurchaseOrderCreate {
            venue_id: "v1".into(),
            supplier_id: "".into(),
            lines: vec![PurchaseOrderLineInput {
                item_id: "".into(),
                qty: rust_decimal::Decimal::ONE,
                unit_cost: 10,
            }],
        };
        let err = validation_error(input.validate().unwrap_err());
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        let paths: Vec<_> = err.details.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["lines.0.item_id", "supplier_id"]);
    }
}
