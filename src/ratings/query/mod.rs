// Rating queries - parameter parsing, SQL composition and result sequences

pub mod builder;
pub mod params;
pub mod results;

pub use builder::{Direction, RatingQuery};
pub use params::{
    find_param_value, parse_base_param, BaseParam, Join, Operand, Operator, ParamCondition,
    ParamValue,
};
pub use results::ResultSet;
