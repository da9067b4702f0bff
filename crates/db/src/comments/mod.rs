pub mod models;
pub mod pg_repository;
pub mod repositories;

pub use models::{comment_table, CommentRow, TableDescriptor};
pub use pg_repository::PgCommentRepository;
pub use repositories::CommentRepository;
