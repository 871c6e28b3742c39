pub mod asset_service;
pub mod derivatives;
pub mod metadata;
pub mod naming;
pub mod public_resolver;
pub mod resample;
pub mod validator;

#[cfg(feature = "s3")]
pub mod s3_service;
