// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements preemptive multitasking, using independent threads of execution.
//!
//! ## Preemptive multitasking
//!
//! The [`thread`] module implements Firefly threads, each of which has its
//! own stack and execution state. This also includes the scheduler, which
//! can be used to switch from one thread to another, and for a thread to
//! sleep and be resumed. Combined with the Programmable Interval Timer
//! handler, this will pre-empt threads to allow fair sharing of the CPU.

#![no_std]
#![feature(binary_heap_retain)]
#![feature(const_btree_new)]

extern crate alloc;

pub mod process;
pub mod scheduler;
pub mod thread;
mod switch;

use crate::process::{KernelProcessId, Process};
use crate::scheduler::Scheduler;
use crate::thread::{KernelThreadId, Thread};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

/// THREADS stores all living threads, referencing them by
/// their thread id. Note that THREADS does not contain the
/// idle thread, as there is a separate instance for each
/// CPU, tracked in IDLE_THREADS instead.
///
static THREADS: Mutex<BTreeMap<KernelThreadId, Arc<Thread>>> = Mutex::new(BTreeMap::new());

/// CURRENT_THREADS tracks the thread currently executing on
/// each CPU, indexed by `cpu::id()`.
///
static CURRENT_THREADS: Mutex<Vec<Arc<Thread>>> = Mutex::new(Vec::new());

/// IDLE_THREADS tracks the idle thread for each CPU, indexed
/// by `cpu::id()`. Unlike other threads, the idle thread is
/// never stored in THREADS, as it never enters the scheduler.
///
static IDLE_THREADS: Mutex<Vec<Arc<Thread>>> = Mutex::new(Vec::new());

/// SCHEDULER is the kernel's thread scheduler, tracking which
/// threads are currently runnable.
///
static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

/// PROCESSES stores all living user processes, referencing
/// them by their process id.
///
static PROCESSES: Mutex<BTreeMap<KernelProcessId, Process>> = Mutex::new(BTreeMap::new());
