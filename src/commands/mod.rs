pub mod doctor;
pub mod models;
pub mod status;
pub mod up;
