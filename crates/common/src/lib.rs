// notee-common: document and tree types shared by the server and its clients

pub mod tree;
pub mod types;
