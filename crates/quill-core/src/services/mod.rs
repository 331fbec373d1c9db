//! Service layer shared by all clients

mod studio;

pub use studio::StudioService;
