pub mod dto;
pub mod gift_market;
pub mod handler;
pub mod sticker_market;
pub mod tonapi;
