use mbql_ir::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrillError {
    #[error("Drill-throughs are not available for native queries")]
    NativeQuery,

    #[error("Stage {0} does not exist")]
    StageOutOfRange(i32),

    #[error("Column '{0}' has no field reference")]
    NoFieldRef(String),

    #[error("{drill} drill needs a {expected} argument")]
    MissingArgument {
        drill: &'static str,
        expected: &'static str,
    },

    #[error("Invalid argument for {drill} drill: {message}")]
    InvalidArgument { drill: &'static str, message: String },

    #[error("{0} is not a filter drill")]
    NotAFilterDrill(&'static str),

    #[error("{0} is not a pivot drill")]
    NotAPivotDrill(&'static str),

    #[error("{0} is not a combine-columns drill")]
    NotACombineDrill(&'static str),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}
