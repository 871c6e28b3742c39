pub mod check_storage;
