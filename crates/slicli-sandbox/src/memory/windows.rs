//! Windows isolation backend: one named job object per execution.
//!
//! The job carries both a per-process and a whole-job memory limit, plus
//! `KILL_ON_JOB_CLOSE` so the kernel reaps stragglers when the handle is
//! released. Usage probes read `PeakJobMemoryUsed`.

use std::time::Duration;
use tracing::{debug, warn};

use slicli_types::{PluginError, Result};

use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JobObjectExtendedLimitInformation,
    QueryInformationJobObject, SetInformationJobObject, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
    JOB_OBJECT_LIMIT_JOB_MEMORY, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
    JOB_OBJECT_LIMIT_PROCESS_MEMORY,
};
use windows_sys::Win32::System::Threading::GetCurrentProcess;

pub(super) struct IsolationGroup {
    name: String,
    /// Raw job handle, stored as an integer so the group is Send + Sync
    handle: isize,
}

unsafe impl Send for IsolationGroup {}
unsafe impl Sync for IsolationGroup {}

impl IsolationGroup {
    pub(super) fn is_available() -> bool {
        true
    }

    pub(super) fn create(plugin_name: &str, limit_bytes: u64) -> Result<Self> {
        let name = super::group_name(plugin_name);
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();

        let handle = unsafe { CreateJobObjectW(std::ptr::null(), wide.as_ptr()) };
        if handle.is_null() {
            return Err(PluginError::execution(
                plugin_name,
                "create job object",
                format!("CreateJobObjectW failed: {}", std::io::Error::last_os_error()),
            ));
        }

        let mut limits: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { std::mem::zeroed() };
        limits.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_PROCESS_MEMORY
            | JOB_OBJECT_LIMIT_JOB_MEMORY
            | JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        limits.ProcessMemoryLimit = limit_bytes as usize;
        limits.JobMemoryLimit = limit_bytes as usize;

        let ok = unsafe {
            SetInformationJobObject(
                handle,
                JobObjectExtendedLimitInformation,
                &limits as *const _ as *const core::ffi::c_void,
                std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            )
        };
        if ok == 0 {
            unsafe { CloseHandle(handle) };
            return Err(PluginError::execution(
                plugin_name,
                "create job object",
                format!(
                    "SetInformationJobObject failed: {}",
                    std::io::Error::last_os_error()
                ),
            ));
        }

        debug!(group = %name, limit_bytes, "Created job object");
        Ok(Self {
            name,
            handle: handle as isize,
        })
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn attach_current_process(&self) -> Result<()> {
        let ok = unsafe {
            AssignProcessToJobObject(self.handle as _, GetCurrentProcess())
        };
        if ok == 0 {
            return Err(PluginError::execution(
                &self.name,
                "attach",
                format!(
                    "AssignProcessToJobObject failed: {}",
                    std::io::Error::last_os_error()
                ),
            ));
        }
        Ok(())
    }

    pub(super) fn usage(&self) -> Result<u64> {
        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { std::mem::zeroed() };
        let ok = unsafe {
            QueryInformationJobObject(
                self.handle as _,
                JobObjectExtendedLimitInformation,
                &mut info as *mut _ as *mut core::ffi::c_void,
                std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(PluginError::execution(
                &self.name,
                "usage",
                format!(
                    "QueryInformationJobObject failed: {}",
                    std::io::Error::last_os_error()
                ),
            ));
        }
        Ok(info.PeakJobMemoryUsed as u64)
    }

    /// The host process shares the job, so an explicit job termination is
    /// off the table; `KILL_ON_JOB_CLOSE` reaps plugin children when the
    /// handle closes.
    pub(super) async fn terminate_processes(&self, _grace: Duration) -> usize {
        warn!(group = %self.name, "Deferring termination to job-close semantics");
        0
    }

    pub(super) fn release(&self) {
        let ok = unsafe { CloseHandle(self.handle as _) };
        if ok == 0 {
            warn!(group = %self.name, "CloseHandle failed for job object");
        } else {
            debug!(group = %self.name, "Closed job object");
        }
    }
}
