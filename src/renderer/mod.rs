//! 渲染器 - 把页面配置渲染成节点树

mod node;
mod page_renderer;

pub use node::{EventHandler, RenderNode, RenderTree};
pub use page_renderer::PageRenderer;
