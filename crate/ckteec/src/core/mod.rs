pub mod attribute;
pub mod info;
pub mod mechanism;
pub(crate) mod serializer;
