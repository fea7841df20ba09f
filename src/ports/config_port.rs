//! Configuration access port trait.
//!
//! Only raw strings cross the port; [`crate::domain::config_validation`]
//! parses and range-checks them.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
}
