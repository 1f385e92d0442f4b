pub mod params;
pub mod token;
pub mod user;

pub use params::{AddTokenParams, AddUserParams, MissingFields, NewToken, NewUser};
pub use token::{Token, Validity};
pub use user::User;
