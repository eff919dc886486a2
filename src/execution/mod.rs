pub mod reconciler;
pub mod validator;
