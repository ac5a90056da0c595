pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod session;
pub mod store;
pub mod typing;

#[cfg(test)]
mod test_support;
