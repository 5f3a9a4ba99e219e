pub mod credentials;
pub mod document;
pub mod mongodb;
pub mod oauth;
pub mod voting;
