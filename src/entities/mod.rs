pub mod access_token;
pub mod order;
pub mod order_item;
pub mod tea;
pub mod user;

pub use access_token::Entity as AccessToken;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use tea::Entity as Tea;
pub use user::Entity as User;
