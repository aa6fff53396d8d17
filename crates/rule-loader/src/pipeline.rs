//! Rule Loader 파이프라인 -- 워커 풀 생명주기 관리
//!
//! [`RuleLoader`]는 core의 [`Pipeline`] trait을 구현하여
//! `mockbridge-daemon`에서 Collector와 동일한 생명주기로 관리됩니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::info;

use mockbridge_core::error::{MockBridgeError, PipelineError};
use mockbridge_core::pipeline::{HealthStatus, Pipeline};
use mockbridge_queue::RuleQueue;

use crate::backup::BackupSink;
use crate::client::MappingStore;
use crate::config::LoaderConfig;
use crate::consumer::consume_loop;
use crate::error::LoaderError;

/// 파이프라인 실행 상태
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoaderState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// Rule Loader 파이프라인
pub struct RuleLoader<M: MappingStore> {
    config: LoaderConfig,
    state: LoaderState,
    queue: RuleQueue,
    store: Arc<M>,
    backup: Option<Arc<BackupSink>>,
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    /// 연속 큐 pop 실패 수 (헬스 판정용)
    queue_errors: Arc<AtomicU64>,
}

impl<M: MappingStore> RuleLoader<M> {
    /// 현재 상태 이름을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            LoaderState::Initialized => "initialized",
            LoaderState::Running => "running",
            LoaderState::Stopped => "stopped",
        }
    }
}

impl<M: MappingStore> Pipeline for RuleLoader<M> {
    async fn start(&mut self) -> Result<(), MockBridgeError> {
        if self.state == LoaderState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(workers = self.config.workers, "starting rule loader");

        self.cancel = CancellationToken::new();
        self.queue_errors.store(0, Ordering::Relaxed);

        for worker_id in 0..self.config.workers {
            self.tasks.push(tokio::spawn(consume_loop(
                worker_id,
                self.queue.clone(),
                Arc::clone(&self.store),
                self.backup.clone(),
                self.config.clone(),
                self.cancel.clone(),
                Arc::clone(&self.queue_errors),
            )));
        }

        self.state = LoaderState::Running;
        info!("rule loader started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), MockBridgeError> {
        if self.state != LoaderState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping rule loader");

        // 워커는 진행 중인 설치를 끝내고 종료합니다.
        // 데드라인을 넘긴 재시도는 포기되어 데드레터로 갑니다.
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout(std::time::Duration::from_secs(30), task)
                .await
                .is_err()
            {
                abort.abort();
            }
        }

        self.state = LoaderState::Stopped;
        info!("rule loader stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            LoaderState::Running => {
                if self.queue_errors.load(Ordering::Relaxed) > 0 {
                    HealthStatus::Degraded("queue pop failures".to_owned())
                } else {
                    HealthStatus::Healthy
                }
            }
            LoaderState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            LoaderState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// Rule Loader 빌더
pub struct RuleLoaderBuilder<M: MappingStore> {
    config: LoaderConfig,
    queue: Option<RuleQueue>,
    store: Option<M>,
}

impl<M: MappingStore> RuleLoaderBuilder<M> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: LoaderConfig::default(),
            queue: None,
            store: None,
        }
    }

    /// 설정을 지정합니다.
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// 큐 핸들을 지정합니다 (필수).
    pub fn queue(mut self, queue: RuleQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// 규칙 저장소를 지정합니다 (필수).
    pub fn store(mut self, store: M) -> Self {
        self.store = Some(store);
        self
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// 백업 싱크가 설정되어 있으면 여기서 생성됩니다.
    pub async fn build(self) -> Result<RuleLoader<M>, LoaderError> {
        self.config.validate()?;

        let store = self.store.ok_or_else(|| LoaderError::Config {
            field: "store".to_owned(),
            reason: "mapping store is required".to_owned(),
        })?;
        let queue = self.queue.ok_or_else(|| LoaderError::Config {
            field: "queue".to_owned(),
            reason: "queue handle is required".to_owned(),
        })?;

        let backup = match &self.config.backup_sink_path {
            Some(path) => Some(Arc::new(BackupSink::create(path).await?)),
            None => None,
        };

        Ok(RuleLoader {
            config: self.config,
            state: LoaderState::Initialized,
            queue,
            store: Arc::new(store),
            backup,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            queue_errors: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl<M: MappingStore> Default for RuleLoaderBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InstallOutcome;
    use crate::error::InstallError;
    use mockbridge_core::types::MockRuleDescriptor;

    struct NoopStore;

    impl MappingStore for NoopStore {
        async fn install(
            &self,
            _descriptor: &MockRuleDescriptor,
        ) -> Result<InstallOutcome, InstallError> {
            Ok(InstallOutcome::Created)
        }
    }

    #[tokio::test]
    async fn builder_requires_store() {
        let result = RuleLoaderBuilder::<NoopStore>::new().build().await;
        assert!(matches!(result, Err(LoaderError::Config { .. })));
    }

    #[tokio::test]
    async fn builder_rejects_invalid_config() {
        let config = LoaderConfig {
            workers: 0,
            ..Default::default()
        };
        let result = RuleLoaderBuilder::new()
            .config(config)
            .store(NoopStore)
            .build()
            .await;
        assert!(result.is_err());
    }
}
