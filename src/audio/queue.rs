use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, info};

use super::item::Item;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Índice {index} fuera de rango (la cola tiene {len} canciones)")]
    OutOfRange { index: i64, len: usize },
    #[error("La cola está llena (máximo {max} canciones)")]
    Full { max: usize },
}

/// Cola de reproducción de una guild.
///
/// Todas las operaciones toman el mismo `parking_lot::Mutex`. El guard no es
/// `Send`, así que no puede sobrevivir a un `.await` dentro de una tarea
/// lanzada con `tokio::spawn`: bajo el lock solo se manipula la lista.
#[derive(Debug)]
pub struct QueueStore {
    items: Mutex<VecDeque<Item>>,
    max_size: usize,
}

impl QueueStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            max_size,
        }
    }

    /// Agrega un item al final de la cola
    pub fn enqueue_append(&self, item: Item) -> Result<usize, QueueError> {
        let mut items = self.items.lock();
        if items.len() >= self.max_size {
            return Err(QueueError::Full { max: self.max_size });
        }

        info!("➕ Agregado a la cola: {} ({})", item.title, item.kind());
        items.push_back(item);
        Ok(items.len())
    }

    /// Agrega varios items en orden; devuelve cuántos entraron
    pub fn enqueue_many(&self, batch: Vec<Item>) -> usize {
        let mut items = self.items.lock();
        let available = self.max_size.saturating_sub(items.len());
        let to_add = batch.len().min(available);

        items.extend(batch.into_iter().take(to_add));

        info!("➕ Agregadas {} canciones a la cola", to_add);
        to_add
    }

    /// Agrega un item al principio de la cola
    pub fn enqueue_prepend(&self, item: Item) -> Result<(), QueueError> {
        let mut items = self.items.lock();
        if items.len() >= self.max_size {
            return Err(QueueError::Full { max: self.max_size });
        }

        info!("⏫ Agregado al frente de la cola: {}", item.title);
        items.push_front(item);
        Ok(())
    }

    /// Saca el primer item (FIFO)
    pub fn dequeue_head(&self) -> Option<Item> {
        let next = self.items.lock().pop_front();
        match &next {
            Some(item) => debug!("➡️ Siguiente en cola: {}", item.title),
            None => debug!("📭 Cola vacía, no hay siguiente item"),
        }
        next
    }

    /// Extrae el item en la posición `index` (empezando en 1)
    pub fn extract_at(&self, index: i64) -> Result<Item, QueueError> {
        let mut items = self.items.lock();
        Self::take_at(&mut items, index)
    }

    /// Reinserta al frente un item que ya estaba en la cola
    pub fn reinsert_at_front(&self, item: Item) {
        self.items.lock().push_front(item);
    }

    /// Mueve el item `index` (empezando en 1) al frente
    pub fn move_to_front(&self, index: i64) -> Result<Item, QueueError> {
        let mut items = self.items.lock();
        let item = Self::take_at(&mut items, index)?;
        debug!("📍 Item movido de posición {} al frente", index);
        items.push_front(item.clone());
        Ok(item)
    }

    /// Copia ordenada de la cola
    pub fn snapshot_all(&self) -> Vec<Item> {
        self.items.lock().iter().cloned().collect()
    }

    /// Reemplaza todo el contenido de la cola
    pub fn replace_all(&self, batch: Vec<Item>) -> usize {
        let mut items = self.items.lock();
        items.clear();
        items.extend(batch);
        items.len()
    }

    /// Limpia la cola
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let cleared = items.len();
        items.clear();
        info!("🗑️ Cola limpiada: {} items removidos", cleared);
        cleared
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn take_at(items: &mut VecDeque<Item>, index: i64) -> Result<Item, QueueError> {
        let len = items.len();
        let out_of_range = QueueError::OutOfRange { index, len };

        if index <= 0 {
            return Err(out_of_range);
        }
        let position = usize::try_from(index - 1).map_err(|_| out_of_range.clone())?;
        items.remove(position).ok_or(out_of_range)
    }
}

/// Vista de la cola para listados: item actual más los pendientes
#[derive(Debug, Clone)]
pub struct QueueListing {
    pub current: Option<Item>,
    pub items: Vec<Item>,
}

impl QueueListing {
    /// Obtiene una página específica de la cola
    pub fn get_page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let safe_page = page.max(1);
        let start = (safe_page - 1) * items_per_page;
        let end = (start + items_per_page).min(self.items.len());
        let total_pages = if self.items.is_empty() {
            1
        } else {
            self.items.len().div_ceil(items_per_page)
        };

        QueuePage {
            items: if start < self.items.len() {
                self.items[start..end].to_vec()
            } else {
                Vec::new()
            },
            first_position: start + 1,
            current_page: safe_page,
            total_pages,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<Item>,
    /// Posición (empezando en 1) del primer item de la página
    pub first_position: usize,
    pub current_page: usize,
    pub total_pages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, UserId};
    use std::sync::Arc;

    fn item(title: &str) -> Item {
        Item::remote(
            title,
            format!("https://example.com/{title}"),
            ChannelId::new(1),
            UserId::new(1),
        )
    }

    fn titles(queue: &QueueStore) -> Vec<String> {
        queue.snapshot_all().into_iter().map(|i| i.title).collect()
    }

    #[test]
    fn test_appends_preserve_call_order() {
        let queue = QueueStore::new(100);
        for title in ["a", "b", "c", "d"] {
            queue.enqueue_append(item(title)).unwrap();
        }

        let popped: Vec<String> = std::iter::from_fn(|| queue.dequeue_head())
            .map(|i| i.title)
            .collect();
        assert_eq!(popped, vec!["a", "b", "c", "d"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_extract_then_prepend_moves_to_head() {
        let queue = QueueStore::new(100);
        for title in ["a", "b", "c", "d"] {
            queue.enqueue_append(item(title)).unwrap();
        }

        let third = queue.extract_at(3).unwrap();
        queue.enqueue_prepend(third).unwrap();

        assert_eq!(titles(&queue), vec!["c", "a", "b", "d"]);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_move_to_front_is_single_step() {
        let queue = QueueStore::new(100);
        for title in ["a", "b", "c"] {
            queue.enqueue_append(item(title)).unwrap();
        }

        let moved = queue.move_to_front(3).unwrap();
        assert_eq!(moved.title, "c");
        assert_eq!(titles(&queue), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_out_of_range_is_a_noop() {
        let queue = QueueStore::new(100);
        queue.enqueue_append(item("a")).unwrap();
        queue.enqueue_append(item("b")).unwrap();

        assert_eq!(
            queue.extract_at(0),
            Err(QueueError::OutOfRange { index: 0, len: 2 })
        );
        assert_eq!(
            queue.extract_at(-4),
            Err(QueueError::OutOfRange { index: -4, len: 2 })
        );
        assert_eq!(
            queue.move_to_front(3),
            Err(QueueError::OutOfRange { index: 3, len: 2 })
        );
        assert_eq!(titles(&queue), vec!["a", "b"]);
    }

    #[test]
    fn test_full_queue_rejects_items() {
        let queue = QueueStore::new(2);
        queue.enqueue_append(item("a")).unwrap();
        queue.enqueue_append(item("b")).unwrap();

        assert_eq!(queue.enqueue_append(item("c")), Err(QueueError::Full { max: 2 }));
        assert_eq!(queue.enqueue_many(vec![item("d"), item("e")]), 0);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_reinsert_at_front_ignores_limit() {
        let queue = QueueStore::new(1);
        queue.enqueue_append(item("a")).unwrap();
        queue.reinsert_at_front(item("b"));
        assert_eq!(titles(&queue), vec!["b", "a"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_lose_nothing() {
        let queue = Arc::new(QueueStore::new(10_000));
        let producers = 64;
        let per_producer = 25;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    for n in 0..per_producer {
                        queue.enqueue_append(item(&format!("{p}-{n}"))).unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        futures::future::join_all(handles).await;

        let mut all = titles(&queue);
        assert_eq!(all.len(), producers * per_producer);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), producers * per_producer);
    }

    #[test]
    fn test_listing_pages_use_one_based_positions() {
        let listing = QueueListing {
            current: None,
            items: (1..=12).map(|n| item(&n.to_string())).collect(),
        };

        let page = listing.get_page(2, 10);
        assert_eq!(page.first_position, 11);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 2);

        let beyond = listing.get_page(5, 10);
        assert!(beyond.items.is_empty());
    }
}
