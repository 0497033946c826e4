pub(crate) mod runnable;
