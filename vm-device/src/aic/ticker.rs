//! AIC 周期更新线程
//!
//! 以固定间隔执行一次中断分发更新，使延迟 IPI 等状态在没有寄存器
//! 写入时也能生效。线程只持有控制器的弱引用，控制器销毁时线程退出。

use super::Aic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 周期更新线程句柄；drop 时停止并等待线程退出
pub struct AicTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AicTicker {
    /// 启动更新线程
    ///
    /// # 参数
    /// - `aic`: 控制器弱引用
    /// - `interval`: 更新间隔
    pub fn spawn(aic: Weak<Aic>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name("aic-ticker".to_string())
            .spawn({
                let stop = Arc::clone(&stop);
                move || {
                    while !stop.load(Ordering::Acquire) {
                        thread::park_timeout(interval);
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        let Some(aic) = aic.upgrade() else {
                            break;
                        };
                        aic.update();
                    }
                    log::debug!("AIC ticker stopped");
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("Failed to spawn AIC ticker: {}", e);
                None
            }
        };
        Self { stop, handle }
    }

    /// 线程是否在运行
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for AicTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        // 控制器的最后一个引用可能在更新线程上释放
        if handle.thread().id() == thread::current().id() {
            return;
        }
        handle.thread().unpark();
        if handle.join().is_err() {
            log::warn!("AIC ticker thread panicked");
        }
    }
}

impl std::fmt::Debug for AicTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AicTicker")
            .field("running", &self.is_running())
            .finish()
    }
}
