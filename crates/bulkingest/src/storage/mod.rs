pub mod filesystem;
pub mod layout;

pub use layout::{folder_structure_table, render_folder_structure_table, ProjectLayout};
