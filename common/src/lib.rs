//! 持久化网关公共模块
//!
//! 提供网关各组件共享的基础设施：
//! - 配置加载
//! - 统一错误类型与远程错误封装
//! - 统一响应格式
//! - 请求 ID 中间件
//! - 连接与文档操作数据模型

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;
