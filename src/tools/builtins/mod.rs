pub mod delegate;
pub mod fs;
pub mod todo;

pub use delegate::TaskTool;
pub use fs::{ListFilesTool, ReadFileTool, WriteFileTool};
pub use todo::{ReadTodosTool, UpdateTodoStatusTool, WriteTodosTool};
