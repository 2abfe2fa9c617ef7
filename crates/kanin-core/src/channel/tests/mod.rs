use super::*;
use crate::channel::options::SubscribeOption;

mod common;
use common::*;
