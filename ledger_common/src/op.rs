//! Operator boilerplate for integer newtypes.
//!
//! The wrapped type must provide `value()` returning the inner integer and `From<inner>`.

#[macro_export]
macro_rules! op {
    (binary $type:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $type {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self::Output {
                Self::from(std::ops::$trait::$method(self.value(), rhs.value()))
            }
        }
    };
    (inplace $type:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $type {
            fn $method(&mut self, rhs: Self) {
                let mut v = self.value();
                std::ops::$trait::$method(&mut v, rhs.value());
                *self = Self::from(v);
            }
        }
    };
    (unary $type:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $type {
            type Output = Self;

            fn $method(self) -> Self::Output {
                Self::from(std::ops::$trait::$method(self.value()))
            }
        }
    };
}
