mod files;
mod headers;
pub mod progress;
mod size;
mod time;

// Export utility functions
pub use self::files::{create_dirs, output_file_name, temp_dir_for};
pub use self::headers::parse_headers;
pub use self::size::format_bytes;
pub use self::time::{format_duration, format_elapsed};
