use std::cmp::Ordering;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::ops::{Add, Sub};

/// An untyped tracee byte.
pub type Void = u8;

/// An address in a tracee's address space, typed by referent. Pointer
/// arithmetic is in units of `size_of::<T>()`, like a raw pointer, but
/// the address is never dereferenceable from the tracer: all access goes
/// through `session::task` memory operations.
#[derive(Debug, Default, Hash)]
pub struct RemotePtr<T> {
    ptr: usize,
    phantom: PhantomData<T>,
}

impl<T> Copy for RemotePtr<T> {}

impl<T> Clone for RemotePtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> RemotePtr<T> {
    pub fn null() -> RemotePtr<T> {
        RemotePtr {
            ptr: 0,
            phantom: PhantomData,
        }
    }

    pub fn from_val(val: usize) -> RemotePtr<T> {
        RemotePtr {
            ptr: val,
            phantom: PhantomData,
        }
    }

    pub fn as_usize(self) -> usize {
        self.ptr
    }

    pub fn is_null(self) -> bool {
        self.ptr == 0
    }

    pub fn referent_size(self) -> usize {
        std::mem::size_of::<T>()
    }

    pub fn cast<U>(r: RemotePtr<U>) -> RemotePtr<T> {
        RemotePtr::from_val(r.ptr)
    }
}

impl<T> Display for RemotePtr<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.ptr)
    }
}

impl<T> Add<usize> for RemotePtr<T> {
    type Output = Self;

    fn add(self, delta: usize) -> Self::Output {
        Self::from_val(self.ptr + delta * std::mem::size_of::<T>())
    }
}

impl<T> Sub<usize> for RemotePtr<T> {
    type Output = Self;

    fn sub(self, delta: usize) -> Self::Output {
        Self::from_val(self.ptr - delta * std::mem::size_of::<T>())
    }
}

impl<T> PartialEq for RemotePtr<T> {
    fn eq(&self, other: &RemotePtr<T>) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for RemotePtr<T> {}

impl<T> PartialOrd for RemotePtr<T> {
    fn partial_cmp(&self, other: &RemotePtr<T>) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for RemotePtr<T> {
    fn cmp(&self, other: &RemotePtr<T>) -> Ordering {
        self.ptr.cmp(&other.ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_zero() {
        let a = RemotePtr::<u64>::null();
        assert_eq!(0, a.as_usize());
        assert!(a.is_null());
    }

    #[test]
    fn arithmetic_is_in_referent_units() {
        let a = RemotePtr::<u64>::from_val(8);
        assert_eq!(16, (a + 1).as_usize());
        assert_eq!(0, (a - 1).as_usize());
    }

    #[test]
    fn cast_changes_stride_not_address() {
        struct Pair(u64, u64);
        let a = RemotePtr::<u8>::from_val(96);
        let b = RemotePtr::<Pair>::cast(a);
        assert_eq!(96, b.as_usize());
        assert_eq!(112, (b + 1).as_usize());
        let _ = Pair(0, 0);
    }

    #[test]
    fn ordering() {
        let lo = RemotePtr::<u8>::from_val(1);
        let hi = RemotePtr::<u8>::from_val(2);
        assert!(lo < hi);
        assert!(lo == lo);
        assert!(lo != hi);
    }
}
