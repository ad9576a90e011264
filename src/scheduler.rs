// 该文件是 Tanshang （探伤） 项目的一部分。
// src/scheduler.rs - 实时帧调度
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Tanshang 项目贡献者

//! 活动源的准入控制：任一时刻至多一帧在流水线内，
//! 忙时新帧直接丢弃而不是排队，保证消费端处理的总是能拿到的最新帧。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use image::RgbImage;
use tracing::{info, warn};

use crate::detector::{DetectError, DetectResult, Detector};

/// 默认每处理多少帧打一条状态日志
pub const DEFAULT_STATUS_INTERVAL: u64 = 10;

/// 一次会话的计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
  pub frames_processed: u64,
  pub frames_dropped: u64,
  pub frames_failed: u64,
  pub detections: u64,
}

/// 单帧提交的结果
#[derive(Debug)]
pub enum FrameOutcome {
  /// 本帧走完了流水线
  Processed(DetectResult),
  /// 有帧在流水线内，本帧被丢弃
  DroppedBusy,
  /// 会话未启动，本帧被丢弃
  DroppedIdle,
  /// 本帧推理失败，会话继续
  Failed(DetectError),
}

/// 帧调度器。`submit` 可从任意送帧线程调用，
/// 准入判定是一次原子比较交换，两个几乎同时到达的帧
/// 绝不会同时进入不可重入的推理引擎。
pub struct FrameScheduler {
  detector: Arc<Detector>,
  running: AtomicBool,
  busy: AtomicBool,
  frames_processed: AtomicU64,
  frames_dropped: AtomicU64,
  frames_failed: AtomicU64,
  detections: AtomicU64,
  status_interval: u64,
}

impl FrameScheduler {
  pub fn new(detector: Arc<Detector>) -> Self {
    FrameScheduler {
      detector,
      running: AtomicBool::new(false),
      busy: AtomicBool::new(false),
      frames_processed: AtomicU64::new(0),
      frames_dropped: AtomicU64::new(0),
      frames_failed: AtomicU64::new(0),
      detections: AtomicU64::new(0),
      status_interval: DEFAULT_STATUS_INTERVAL,
    }
  }

  pub fn with_status_interval(mut self, frames: u64) -> Self {
    self.status_interval = frames.max(1);
    self
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  /// 开始一次会话：清零计数并开始接收帧
  pub fn start(&self) {
    self.frames_processed.store(0, Ordering::Relaxed);
    self.frames_dropped.store(0, Ordering::Relaxed);
    self.frames_failed.store(0, Ordering::Relaxed);
    self.detections.store(0, Ordering::Relaxed);
    self.running.store(true, Ordering::Release);
    info!("检测会话开始");
  }

  /// 结束会话并返回最终计数。
  /// 在途的那帧会跑完，只是不再接收新帧；没有队列可排空。
  pub fn stop(&self) -> SessionStats {
    self.running.store(false, Ordering::Release);
    let stats = self.stats();
    info!(
      "检测会话结束: 处理 {} 帧, 丢弃 {} 帧, 失败 {} 帧, 检出 {} 个缺陷",
      stats.frames_processed, stats.frames_dropped, stats.frames_failed, stats.detections
    );
    stats
  }

  pub fn stats(&self) -> SessionStats {
    SessionStats {
      frames_processed: self.frames_processed.load(Ordering::Relaxed),
      frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
      frames_failed: self.frames_failed.load(Ordering::Relaxed),
      detections: self.detections.load(Ordering::Relaxed),
    }
  }

  /// 提交一帧。在送帧线程上同步跑完流水线；
  /// 会话未启动或已有帧在途时立即丢弃，绝不排队。
  pub fn submit(&self, image: &RgbImage) -> FrameOutcome {
    if !self.running.load(Ordering::Acquire) {
      return FrameOutcome::DroppedIdle;
    }
    if self
      .busy
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      self.frames_dropped.fetch_add(1, Ordering::Relaxed);
      return FrameOutcome::DroppedBusy;
    }

    let outcome = match self.detector.detect(image) {
      Ok(result) => {
        let processed = self.frames_processed.fetch_add(1, Ordering::Relaxed) + 1;
        self
          .detections
          .fetch_add(result.items.len() as u64, Ordering::Relaxed);
        if processed % self.status_interval == 0 {
          let stats = self.stats();
          info!(
            "已处理 {} 帧, 丢弃 {} 帧, 累计检出 {} 个缺陷",
            stats.frames_processed, stats.frames_dropped, stats.detections
          );
        }
        FrameOutcome::Processed(result)
      }
      Err(e) => {
        self.frames_failed.fetch_add(1, Ordering::Relaxed);
        warn!("帧推理失败, 会话继续: {}", e);
        FrameOutcome::Failed(e)
      }
    };

    self.busy.store(false, Ordering::Release);
    outcome
  }
}
