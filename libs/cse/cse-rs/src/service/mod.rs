pub mod encrypt_folder;
pub mod keychain;
pub mod logging;
pub mod membership;
pub mod metadata_handler;
