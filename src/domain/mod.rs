// 領域層：交通模型、地圖 id、類別與介面

pub mod category;
pub mod disturbance;
pub mod map_id;
pub mod model;
pub mod ports;
