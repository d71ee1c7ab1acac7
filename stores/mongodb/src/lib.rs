//! MongoDB driver for the document product collection.

pub mod mongo_driver;

pub use mongo_driver::{ MongoDriver, MongoProducts };
