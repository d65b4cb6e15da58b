mod hash_tool;
mod http_tool;
mod image_tool;
mod record_tools;
mod time_tool;
mod weather_tool;

use std::sync::Arc;

use crate::storage::RecordStore;
use crate::tools::ToolRegistry;

pub use hash_tool::HashTool;
pub use http_tool::HttpRequestTool;
pub use image_tool::{DEFAULT_IMAGE_API_URL, GenerateImageTool};
pub use record_tools::{RetrieveRecordsTool, UpdateRecordsTool};
pub use time_tool::CurrentTimeTool;
pub use weather_tool::GetWeatherTool;

/// Register all stateless built-in tools into the registry.
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register(Arc::new(GetWeatherTool));
    registry.register(Arc::new(GenerateImageTool::new(DEFAULT_IMAGE_API_URL)));
    registry.register(Arc::new(HttpRequestTool));
    registry.register(Arc::new(HashTool));
    registry.register(Arc::new(CurrentTimeTool));
}

/// Register the tools that read and write the backing record store.
pub fn register_store_tools(registry: &mut ToolRegistry, records: Arc<dyn RecordStore>) {
    registry.register(Arc::new(RetrieveRecordsTool::new(records.clone())));
    registry.register(Arc::new(UpdateRecordsTool::new(records)));
}
