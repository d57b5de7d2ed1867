//! BLR byte codes understood by the message format decoder

pub const VERSION4: u8 = 4;
pub const VERSION5: u8 = 5;
pub const BEGIN: u8 = 2;
pub const MESSAGE: u8 = 4;
pub const END: u8 = 255;

pub const TEXT: u8 = 14;
pub const TEXT2: u8 = 15;
pub const SHORT: u8 = 7;
pub const LONG: u8 = 8;
pub const QUAD: u8 = 9;
pub const FLOAT: u8 = 10;
pub const D_FLOAT: u8 = 11;
pub const SQL_DATE: u8 = 12;
pub const SQL_TIME: u8 = 13;
pub const INT64: u8 = 16;
pub const BLOB2: u8 = 17;
pub const BOOL: u8 = 23;
pub const DEC64: u8 = 24;
pub const DEC128: u8 = 25;
pub const INT128: u8 = 26;
pub const DOUBLE: u8 = 27;
pub const SQL_TIME_TZ: u8 = 28;
pub const TIMESTAMP_TZ: u8 = 29;
pub const EX_TIME_TZ: u8 = 30;
pub const EX_TIMESTAMP_TZ: u8 = 31;
pub const TIMESTAMP: u8 = 35;
pub const VARYING: u8 = 37;
pub const VARYING2: u8 = 38;
pub const CSTRING: u8 = 40;
pub const CSTRING2: u8 = 41;
