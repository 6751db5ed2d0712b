use once_cell::sync::Lazy;
use regex::Regex;
use rocket::serde::json::Json;
use validator::{Validate, ValidationError};

use crate::error::AppError;

pub static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").expect("username pattern is valid"));

pub static SECTION_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:-]{1,128}$").expect("section pattern is valid"));

/// Runs the `validator` derive on a request body and turns failures into an
/// `AppError::InvalidFields`.
pub trait ValidateExt: Validate + Sized {
    fn validated(self) -> Result<Self, AppError> {
        self.validate()?;
        Ok(self)
    }
}

impl<T: Validate> ValidateExt for T {}

pub trait JsonValidateExt<T> {
    fn into_validated(self) -> Result<T, AppError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn into_validated(self) -> Result<T, AppError> {
        self.into_inner().validated()
    }
}

pub fn validate_learning_preferences(value: &serde_json::Value) -> Result<(), ValidationError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(ValidationError::new("learning_preferences")
            .with_message("Learning preferences must be a JSON object".into()))
    }
}

pub fn validate_achievement_criteria(value: &serde_json::Value) -> Result<(), ValidationError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(ValidationError::new("criteria")
            .with_message("Achievement criteria must be a JSON object".into()))
    }
}
