pub mod context;
pub mod index_state;
pub mod legacy;
pub mod lexical;
pub mod manager;
pub mod scorer;
