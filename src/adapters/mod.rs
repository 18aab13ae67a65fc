// 轉接層：領域介面的具體實作

pub mod feed;
pub mod fixture;
pub mod report;
pub mod storage;
pub mod traffic_db;
pub mod traffic_ipc;
pub mod transport;
