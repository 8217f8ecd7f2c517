pub mod serve;
pub mod validator;
