mod binder;
mod helpers;
mod inventory;
