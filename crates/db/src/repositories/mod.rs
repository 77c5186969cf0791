//! Repository layer: zero-sized structs whose associated functions take a
//! pool or connection and run one query each.

mod data_key_repo;
mod gift_item_repo;
mod reservation_repo;
mod user_repo;
mod wish_list_repo;

pub use data_key_repo::DataKeyRepo;
pub use gift_item_repo::GiftItemRepo;
pub use reservation_repo::ReservationRepo;
pub use user_repo::UserRepo;
pub use wish_list_repo::WishListRepo;
