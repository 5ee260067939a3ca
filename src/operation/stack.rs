use std::alloc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use lazy_static::lazy_static;

lazy_static! {
    static ref PAGE_SIZE: usize = unsafe {
        let rc = libc::sysconf(libc::_SC_PAGESIZE);
        if rc == -1 {
            panic!("fail to evaluate sysconf(_SC_PAGESIZE), got errno {}", errno::errno());
        }
        rc as usize
    };
}

fn page_size() -> usize {
    *PAGE_SIZE
}

/// StackSize specifies desired stack size for operation fibers.
///
/// It defaults to `16` times page size or [libc::MINSIGSTKSZ] depending on which one is bigger.
#[derive(Copy, Clone, Default, Debug)]
pub struct StackSize {
    size: isize,
}

impl StackSize {
    fn align_to_page_size(size: usize) -> usize {
        let mask = page_size() - 1;
        (size + mask) & !mask
    }

    fn aligned_page_size(&self) -> usize {
        let size = match self.size {
            0 => 16 * page_size(),
            1.. => 16 * page_size() + Self::align_to_page_size(self.size as usize),
            _ => Self::align_to_page_size((-self.size) as usize),
        };
        size.max(libc::MINSIGSTKSZ)
    }

    /// Specifies extra stack size in addition to default.
    pub fn with_extra_size(size: usize) -> StackSize {
        assert!(size <= isize::MAX as usize);
        StackSize { size: size as isize }
    }

    /// Specifies desired stack size.
    pub fn with_size(size: usize) -> StackSize {
        assert!(size <= isize::MAX as usize, "stack size is too large");
        StackSize { size: -(size.max(1) as isize) }
    }
}

pub(crate) struct Stack {
    base: *mut u8,
    size: libc::size_t,
}

unsafe impl Send for Stack {}

impl Stack {
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    fn alloc(size: StackSize) -> Stack {
        let page_size = page_size();
        let stack_size = size.aligned_page_size();
        let alloc_size = stack_size + 2 * page_size;
        let layout = unsafe { alloc::Layout::from_size_align_unchecked(alloc_size, page_size) };
        let stack_low = unsafe { alloc::alloc(layout) };
        if stack_low.is_null() {
            alloc::handle_alloc_error(layout);
        }
        let stack_base = unsafe { stack_low.add(page_size) };
        let stack_high = unsafe { stack_base.add(stack_size) };
        unsafe { libc::mprotect(stack_low as *mut libc::c_void, page_size, libc::PROT_NONE) };
        unsafe { libc::mprotect(stack_high as *mut libc::c_void, page_size, libc::PROT_NONE) };
        Stack { base: stack_base, size: stack_size }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if self.base.is_null() {
            return;
        }
        let page_size = page_size();
        let alloc_size = self.size + 2 * page_size;
        let low = unsafe { self.base.sub(page_size) };
        let high = unsafe { self.base.add(self.size) };
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        unsafe { libc::mprotect(low as *mut libc::c_void, page_size, prot) };
        unsafe { libc::mprotect(high as *mut libc::c_void, page_size, prot) };
        let layout = unsafe { alloc::Layout::from_size_align_unchecked(alloc_size, page_size) };
        unsafe { alloc::dealloc(low, layout) };
    }
}

/// Thread-safe pool of fixed-size fiber stacks.
///
/// Freed stacks go back to the free list and are handed out again before any
/// fresh mapping. Nothing is returned to the system until the pool drops.
pub(crate) struct StackPool {
    size: StackSize,
    free: Mutex<Vec<Stack>>,
    allocated: AtomicUsize,
}

impl StackPool {
    pub fn new(size: StackSize) -> StackPool {
        StackPool { size, free: Mutex::new(Vec::new()), allocated: AtomicUsize::new(0) }
    }

    pub fn alloc(&self) -> Stack {
        if let Some(stack) = self.free.lock().unwrap().pop() {
            return stack;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Stack::alloc(self.size)
    }

    pub fn dealloc(&self, stack: Stack) {
        self.free.lock().unwrap().push(stack);
    }

    /// Number of stacks mapped from the system so far.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of stacks currently sitting in the free list.
    pub fn pooled(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_stack(stack: &Stack) {
        let _ = *unsafe { stack.base().as_ref().unwrap() };
        let _ = *unsafe { stack.base().add(stack.size() - 1).as_ref().unwrap() };
    }

    fn write_stack(stack: &Stack) {
        *unsafe { stack.base().as_mut().unwrap() } = 0x11;
        *unsafe { stack.base().add(stack.size() - 1).as_mut().unwrap() } = 0x11;
    }

    #[test]
    fn stack_default() {
        let stack = Stack::alloc(StackSize::default());
        assert!(stack.size() / page_size() > 0);
        assert_eq!(stack.size() % page_size(), 0);

        read_stack(&stack);
        write_stack(&stack);
    }

    #[test]
    fn stack_custom() {
        let stack = Stack::alloc(StackSize::with_size(20));
        assert!(stack.size() / page_size() > 0);
        assert_eq!(stack.size() % page_size(), 0);

        read_stack(&stack);
        write_stack(&stack);
    }

    #[test]
    fn stack_extra_size() {
        let stack = Stack::alloc(StackSize::with_extra_size(20));
        assert!(stack.size() / page_size() > 0);
        assert_eq!(stack.size() % page_size(), 0);

        read_stack(&stack);
        write_stack(&stack);
    }

    #[test]
    fn pool_recycles() {
        let pool = StackPool::new(StackSize::default());
        let first = pool.alloc();
        let second = pool.alloc();
        assert_eq!(pool.allocated(), 2);

        pool.dealloc(first);
        pool.dealloc(second);
        assert_eq!(pool.pooled(), 2);

        let reused = pool.alloc();
        write_stack(&reused);
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.pooled(), 1);
        pool.dealloc(reused);
    }
}
