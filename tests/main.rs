mod support;

mod cursor_ops;
mod keypath;
mod store_ops;
mod transaction_ops;
