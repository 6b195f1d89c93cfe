pub mod brain;
pub mod document;
pub mod image;
pub mod note;
